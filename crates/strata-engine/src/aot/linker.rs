//! Linking through the system toolchain
//!
//! Executables and shared libraries go through the C compiler driver
//! (`cc` unless configured) together with the runtime staticlib. Static
//! libraries are archived with `ar rcs`. A relocatable `Object` output is
//! a partial link (`cc -r`) of the emitted objects without the runtime.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

/// File name of the runtime staticlib produced by `strata-runtime`
pub const RUNTIME_LIB_NAME: &str = "libstrata_runtime.a";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Object,
    StaticLib,
    SharedLib,
    #[default]
    Executable,
}

impl OutputKind {
    /// Whether the output carries a C `main` and the runtime
    pub fn needs_entry(self) -> bool {
        self == OutputKind::Executable
    }

    pub fn needs_runtime(self) -> bool {
        matches!(self, OutputKind::Executable | OutputKind::SharedLib)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("`{tool}` could not be started: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("`{tool}` failed (exit status {status:?}):\n{stderr}")]
    ToolFailed { tool: String, status: Option<i32>, stderr: String },

    #[error("runtime library not found (looked for {0})")]
    MissingRuntime(String),

    #[error("symbol `{0}` is defined by more than one module")]
    DuplicateSymbol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything needed for one link step
#[derive(Debug, Clone)]
pub struct LinkJob<'a> {
    pub objects: &'a [PathBuf],
    pub output: &'a Path,
    pub kind: OutputKind,
    pub runtime_lib: Option<&'a Path>,
    pub cc: &'a str,
    pub gc_sections: bool,
}

/// Resolve the runtime staticlib: an explicit path must exist; otherwise
/// look next to the current executable and in the workspace target dirs
pub fn locate_runtime_lib(explicit: Option<&Path>) -> Result<PathBuf, LinkError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(LinkError::MissingRuntime(path.display().to_string()))
        };
    }
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        for dir in exe.ancestors().skip(1).take(3) {
            candidates.push(dir.join(RUNTIME_LIB_NAME));
        }
    }
    let workspace_target = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target");
    for profile in ["release", "debug"] {
        candidates.push(workspace_target.join(profile).join(RUNTIME_LIB_NAME));
    }
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| LinkError::MissingRuntime(RUNTIME_LIB_NAME.to_string()))
}

/// Whether `tool` can be spawned at all
pub fn tool_available(tool: &str) -> bool {
    Command::new(tool).arg("--version").output().is_ok()
}

/// System libraries the Rust staticlib depends on
fn native_libs() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["-lSystem"]
    } else if cfg!(target_os = "linux") {
        &["-lgcc_s", "-lutil", "-lrt", "-lpthread", "-lm", "-ldl", "-lc"]
    } else {
        &[]
    }
}

fn gc_sections_flag() -> &'static str {
    if cfg!(target_os = "macos") {
        "-Wl,-dead_strip"
    } else {
        "-Wl,--gc-sections"
    }
}

fn run(mut cmd: Command, tool: &str) -> Result<(), LinkError> {
    tracing::debug!(command = ?cmd, "running link tool");
    let output = cmd
        .output()
        .map_err(|source| LinkError::ToolNotFound { tool: tool.to_string(), source })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(LinkError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn link(job: &LinkJob<'_>) -> Result<(), LinkError> {
    if job.kind == OutputKind::StaticLib {
        if job.output.exists() {
            std::fs::remove_file(job.output)?;
        }
        let mut cmd = Command::new("ar");
        cmd.arg("rcs").arg(job.output).args(job.objects);
        return run(cmd, "ar");
    }

    let mut cmd = Command::new(job.cc);
    match job.kind {
        OutputKind::Object => {
            cmd.args(["-r", "-nostdlib"]);
        }
        OutputKind::SharedLib => {
            cmd.arg("-shared");
        }
        OutputKind::Executable | OutputKind::StaticLib => {}
    }
    cmd.args(job.objects);
    if job.kind.needs_runtime() {
        let runtime = locate_runtime_lib(job.runtime_lib)?;
        cmd.arg(runtime);
        cmd.args(native_libs());
        if job.gc_sections {
            cmd.arg(gc_sections_flag());
        }
    }
    cmd.arg("-o").arg(job.output);
    run(cmd, job.cc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_runtime_must_exist() {
        let err = locate_runtime_lib(Some(Path::new("/definitely/not/here.a"))).unwrap_err();
        assert!(matches!(err, LinkError::MissingRuntime(ref p) if p.contains("not/here")));
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let objects = vec![PathBuf::from("a.o")];
        let job = LinkJob {
            objects: &objects,
            output: Path::new("out.o"),
            kind: OutputKind::Object,
            runtime_lib: None,
            cc: "strata-no-such-cc",
            gc_sections: false,
        };
        assert!(matches!(link(&job), Err(LinkError::ToolNotFound { ref tool, .. }) if tool == "strata-no-such-cc"));
    }

    #[test]
    fn test_tool_failure_keeps_stderr() {
        if !tool_available("cc") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.o");
        std::fs::write(&bogus, b"not an object").unwrap();
        let objects = vec![bogus];
        let job = LinkJob {
            objects: &objects,
            output: &dir.path().join("out.o"),
            kind: OutputKind::Object,
            runtime_lib: None,
            cc: "cc",
            gc_sections: false,
        };
        match link(&job) {
            Err(LinkError::ToolFailed { stderr, .. }) => assert!(!stderr.is_empty()),
            other => panic!("expected a tool failure, got {other:?}"),
        }
    }

    #[test]
    fn test_output_kind_serde() {
        let kind: OutputKind = serde_json::from_str("\"shared_lib\"").unwrap();
        assert_eq!(kind, OutputKind::SharedLib);
        assert!(OutputKind::Executable.needs_entry());
        assert!(!OutputKind::StaticLib.needs_runtime());
    }
}
