//! Background recompilation thread
//!
//! Requests arrive over a crossbeam channel. The worker builds each module,
//! swaps the requested entry into the caller's address table and keeps the
//! compiled code alive until the compiler shuts down. Senders cloned into
//! `JitModule`s may outlive the compiler, so shutdown uses its own channel.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};

use super::table::AddressTable;
use crate::codegen::{CodegenError, OptLevel};
use crate::ir::IrModule;
use crate::tier::{Tier, TierManager};

pub struct CompileRequest {
    pub module: Arc<IrModule>,
    pub function: String,
    pub opt_level: OptLevel,
    /// Reserved for `module`: slot `i` belongs to `module.functions[i]`
    pub table: Arc<AddressTable>,
    /// Told about the new tier (or the failure) when set
    pub tiers: Option<Arc<TierManager>>,
}

#[derive(Debug)]
pub struct CompileOutcome {
    pub function: String,
    pub opt_level: OptLevel,
    pub result: Result<(), CodegenError>,
}

pub struct BackgroundCompiler {
    requests: Option<Sender<CompileRequest>>,
    outcomes: Receiver<CompileOutcome>,
    /// Dropped to stop the worker
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundCompiler {
    pub fn spawn() -> std::io::Result<Self> {
        let (request_tx, request_rx) = channel::unbounded::<CompileRequest>();
        let (outcome_tx, outcome_rx) = channel::unbounded();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let worker = std::thread::Builder::new()
            .name("strata-jit-compiler".into())
            .spawn(move || run(request_rx, stop_rx, outcome_tx))?;
        Ok(BackgroundCompiler {
            requests: Some(request_tx),
            outcomes: outcome_rx,
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub(crate) fn sender(&self) -> Option<Sender<CompileRequest>> {
        self.requests.clone()
    }

    pub fn submit(&self, request: CompileRequest) -> Result<(), super::JitError> {
        let tx = self.requests.as_ref().ok_or(super::JitError::CompilerStopped)?;
        tx.send(request).map_err(|_| super::JitError::CompilerStopped)
    }

    /// Completed requests, in completion order
    pub fn outcomes(&self) -> &Receiver<CompileOutcome> {
        &self.outcomes
    }

    /// Finish queued requests, then join the worker
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.requests.take();
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("jit compiler thread panicked");
            }
        }
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(requests: Receiver<CompileRequest>, stop: Receiver<()>, outcomes: Sender<CompileOutcome>) {
    let mut retained = Vec::new();
    loop {
        let request = crossbeam::select! {
            recv(requests) -> request => match request {
                Ok(request) => request,
                Err(_) => break,
            },
            recv(stop) -> _ => {
                for request in requests.try_iter() {
                    compile(request, &mut retained, &outcomes);
                }
                break;
            }
        };
        compile(request, &mut retained, &outcomes);
    }
    tracing::debug!(modules = retained.len(), "jit compiler stopped");
}

fn compile(request: CompileRequest, retained: &mut Vec<cranelift_jit::JITModule>, outcomes: &Sender<CompileOutcome>) {
    let result = super::build(&request.module, request.opt_level, &request.table).and_then(|(code, entries)| {
        // Keep the code even when nothing is swapped: `build` already finalized it.
        retained.push(code);
        let (_, entry) = entries
            .into_iter()
            .find(|(name, _)| *name == request.function)
            .ok_or_else(|| CodegenError::MissingFunction(request.function.clone()))?;
        request.table.swap(&request.function, entry);
        Ok(())
    });
    if let Some(tiers) = &request.tiers {
        match &result {
            Ok(()) => tiers.mark_compiled(&request.function, Tier::Optimized),
            Err(_) => tiers.release(&request.function),
        }
    }
    match &result {
        Ok(()) => tracing::debug!(function = %request.function, opt = %request.opt_level, "background recompile done"),
        Err(error) => tracing::warn!(function = %request.function, %error, "background recompile failed"),
    }
    // Nobody listening is fine.
    let _ = outcomes.send(CompileOutcome {
        function: request.function,
        opt_level: request.opt_level,
        result,
    });
}
