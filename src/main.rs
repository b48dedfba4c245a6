//! CLI entry point for ghtoken.

use std::process::ExitCode;

mod app;
mod cli;

/// Process outcome mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Command completed.
    Success,
    /// `delete --exit-code` found nothing to delete.
    NothingToDelete,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::NothingToDelete => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::run().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
