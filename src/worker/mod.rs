pub mod command;
pub mod launcher;

pub use command::{WorkerCommand, WorkerSettings};
pub use launcher::{ActiveWorker, LaunchError, RunHandle, WorkerExit, WorkerLauncher};
