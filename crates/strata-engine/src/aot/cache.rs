//! On-disk object cache
//!
//! Entries are `<sha256>.o` under the cache directory. The key covers the
//! canonical IR text and every flag that changes the emitted bytes.
//! Writes go to a temporary file first and are renamed into place so a
//! concurrent reader never sees a partial object.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::lto::LtoMode;
use crate::codegen::OptLevel;
use crate::ir::{serialize_module, IrModule, IR_FORMAT_VERSION};

/// Hex-encoded SHA-256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(module: &IrModule, opt_level: OptLevel, lto: LtoMode, triple: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"strata-object\0");
        hasher.update(strata_runtime::ABI_VERSION.to_le_bytes());
        hasher.update(IR_FORMAT_VERSION.to_le_bytes());
        hasher.update(opt_level.cranelift_name().as_bytes());
        hasher.update(b"\0");
        hasher.update(lto.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(triple.as_bytes());
        hasher.update(b"\0");
        hasher.update(serialize_module(module).as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct ObjectCache {
    dir: PathBuf,
}

impl ObjectCache {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(ObjectCache { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.o", key.as_str()))
    }

    /// Cached object bytes, or `None` on a miss
    pub fn get(&self, key: &CacheKey) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> io::Result<()> {
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key.as_str(), std::process::id()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        if let Err(e) = fs::rename(&tmp, self.entry_path(key)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunction};

    fn module(n: f64) -> IrModule {
        let mut module = IrModule::new("m");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let v = b.number(n);
        b.print(v);
        b.ret(None);
        module.add_function(main);
        module
    }

    #[test]
    fn test_key_depends_on_ir_and_flags() {
        let base = CacheKey::compute(&module(1.0), OptLevel::Speed, LtoMode::None, "x86_64-unknown-linux-gnu");
        let same = CacheKey::compute(&module(1.0), OptLevel::Speed, LtoMode::None, "x86_64-unknown-linux-gnu");
        assert_eq!(base, same);
        assert_eq!(base.as_str().len(), 64);
        let others = [
            CacheKey::compute(&module(2.0), OptLevel::Speed, LtoMode::None, "x86_64-unknown-linux-gnu"),
            CacheKey::compute(&module(1.0), OptLevel::None, LtoMode::None, "x86_64-unknown-linux-gnu"),
            CacheKey::compute(&module(1.0), OptLevel::Speed, LtoMode::Thin, "x86_64-unknown-linux-gnu"),
            CacheKey::compute(&module(1.0), OptLevel::Speed, LtoMode::None, "aarch64-unknown-linux-gnu"),
        ];
        for other in &others {
            assert_ne!(&base, other);
        }
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ObjectCache::open(dir.path().join("objects")).unwrap();
        let key = CacheKey::compute(&module(1.0), OptLevel::Speed, LtoMode::None, "t");
        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(&key, b"\x7fELF").unwrap();
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some(&b"\x7fELF"[..]));
        let leftovers = fs::read_dir(cache.dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
