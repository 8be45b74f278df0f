//! Target ISA construction

use std::str::FromStr;

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use serde::{Deserialize, Serialize};
use target_lexicon::Triple;

use super::CodegenError;

/// Cranelift optimization tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting
    pub fn cranelift_name(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

impl std::fmt::Display for OptLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cranelift_name())
    }
}

pub fn host_triple() -> Triple {
    Triple::host()
}

/// Build an ISA for `triple` (host when `None`). Position-independent code
/// is required for objects that end up in shared libraries.
pub fn isa_for(triple: Option<&str>, opt: OptLevel, pic: bool) -> Result<OwnedTargetIsa, CodegenError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", opt.cranelift_name())
        .map_err(|e| CodegenError::Isa(format!("failed to set opt_level: {}", e)))?;
    flag_builder
        .set("is_pic", if pic { "true" } else { "false" })
        .map_err(|e| CodegenError::Isa(format!("failed to set is_pic: {}", e)))?;
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| CodegenError::Isa(format!("failed to set use_colocated_libcalls: {}", e)))?;
    let flags = settings::Flags::new(flag_builder);

    let builder = match triple {
        None => cranelift_native::builder()
            .map_err(|e| CodegenError::Isa(format!("failed to create native ISA builder: {}", e)))?,
        Some(name) => {
            let triple = Triple::from_str(name).map_err(|_| CodegenError::UnsupportedTarget(name.to_string()))?;
            cranelift_codegen::isa::lookup(triple).map_err(|_| CodegenError::UnsupportedTarget(name.to_string()))?
        }
    };
    builder
        .finish(flags)
        .map_err(|e| CodegenError::Isa(format!("failed to finish ISA: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_isa() {
        let isa = isa_for(None, OptLevel::Speed, false).unwrap();
        assert_eq!(isa.pointer_bytes(), 8);
    }

    #[test]
    fn test_unknown_triple_rejected() {
        assert!(matches!(
            isa_for(Some("not-a-real-triple"), OptLevel::None, true),
            Err(CodegenError::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn test_opt_level_serde_names() {
        assert_eq!(serde_json::to_string(&OptLevel::SpeedAndSize).unwrap(), "\"speed_and_size\"");
        assert_eq!(OptLevel::default(), OptLevel::Speed);
    }
}
