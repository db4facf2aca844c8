//! Purpose: One request's pipeline: decode, stage, invoke, read back, clean up.
//! Exports: `Runner`.
//! Role: Transport-agnostic core of every route; the HTTP layer only maps results.
//! Invariants: Exactly one staging directory per decoded request, gone on return.
//! Invariants: Each run gets a fresh `BufferUi`; nothing is shared between requests.
//! Invariants: Engine exit codes pass through untouched; only adapter failures are `Error`s.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::api::message::{Request, Response};
use crate::core::engine::Engine;
use crate::core::error::Error;
use crate::core::invocation::{Invocation, Operation};
use crate::core::staging::StagedFiles;
use crate::core::ui::BufferUi;

#[derive(Clone)]
pub struct Runner {
    engine: Arc<dyn Engine>,
    staging_dir: Option<PathBuf>,
}

impl Runner {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            staging_dir: None,
        }
    }

    /// Parent directory for per-request staging dirs; defaults to the system temp dir.
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    /// Runs `operation` for a raw JSON request body. Blocking.
    pub fn run(&self, operation: Operation, destroy: bool, body: &[u8]) -> Result<Response, Error> {
        let request = Request::from_slice(body)?;
        let mut contents = request.contents();
        if operation == Operation::Plan {
            // Plan always generates its own; a client plan must never be read back.
            contents.plan = &[];
        }
        let mut files = StagedFiles::create(self.staging_dir(), contents)?;

        let invocation = match operation {
            Operation::Apply => Invocation::apply(&files, destroy),
            Operation::Plan => Invocation::plan(&mut files, destroy),
            Operation::Refresh => Invocation::refresh(&files),
        };

        let mut ui = BufferUi::new();
        let started = Instant::now();
        let exit_code = self.engine.run(&invocation, &mut ui)?;
        info!(
            operation = %operation,
            destroy,
            exit_code,
            elapsed = ?started.elapsed(),
            "engine run finished"
        );

        let mut response = Response::from_run(ui, exit_code);
        if operation == Operation::Plan {
            match files.read_plan() {
                Ok(plan) => response.set_plan(&plan),
                // A failed plan run may never write the file; its error text is the answer.
                Err(_) if exit_code != 0 => {}
                Err(err) => return Err(err),
            }
        }
        response.set_state(files.read_state()?)?;

        if let Err(err) = files.close() {
            warn!(error = %err, "staging directory cleanup failed");
        }
        Ok(response)
    }
}
