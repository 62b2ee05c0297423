use super::{ConfigCache, ErrorKind, PoolConfig, Result};
use crate::checksum::XxHash;
use bincode::{deserialize, serialize_into};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

static MAGIC: &[u8] = b"SPACACHE\n";

#[derive(Serialize, Deserialize)]
struct CacheFile<P> {
    magic: [u8; 9],
    configs: P,
}

fn pack(configs: &[&PoolConfig]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    {
        let mut this = CacheFile {
            magic: [0; 9],
            configs,
        };
        this.magic.copy_from_slice(MAGIC);
        serialize_into(&mut data, &this)?;
    }
    let checksum = XxHash::of(&data);
    serialize_into(&mut data, &checksum)?;
    Ok(data)
}

fn unpack(b: &[u8]) -> Result<Vec<PoolConfig>> {
    if b.len() < MAGIC.len() + XxHash::SIZE {
        bail!(ErrorKind::Truncated);
    }
    let (payload, trailer) = b.split_at(b.len() - XxHash::SIZE);
    let checksum: XxHash = deserialize(trailer)?;
    checksum.verify(payload)?;
    let this: CacheFile<Vec<PoolConfig>> = deserialize(payload)?;
    if this.magic != MAGIC {
        bail!(ErrorKind::InvalidMagic);
    }
    Ok(this.configs)
}

/// A configuration cache backed by a single file.
///
/// The file is rewritten as a whole on every change. A new version is first
/// written next to the old one and then renamed over it, so readers always
/// see either the old or the new contents.
#[derive(Debug)]
pub struct FileConfigCache {
    path: PathBuf,
    configs: Mutex<BTreeMap<String, PoolConfig>>,
}

impl FileConfigCache {
    /// Opens the cache file at `path`. A missing file is an empty cache.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let configs = match fs::read(&path) {
            Ok(data) => unpack(&data)?,
            Err(ref e) if e.kind() == IoErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(
            "loaded {} pool configurations from {}",
            configs.len(),
            path.display()
        );
        Ok(FileConfigCache {
            path,
            configs: Mutex::new(
                configs
                    .into_iter()
                    .map(|config| (config.name.clone(), config))
                    .collect(),
            ),
        })
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_out(&self, configs: &BTreeMap<String, PoolConfig>) -> Result<()> {
        let data = pack(&configs.values().collect::<Vec<_>>())?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        trace!("wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }
}

impl ConfigCache for FileConfigCache {
    fn persist(&self, config: &PoolConfig) -> Result<()> {
        let mut configs = self.configs.lock();
        configs.insert(config.name.clone(), config.clone());
        self.write_out(&configs)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut configs = self.configs.lock();
        if configs.remove(name).is_some() {
            self.write_out(&configs)?;
        }
        Ok(())
    }

    fn configs(&self) -> Result<Vec<PoolConfig>> {
        Ok(self.configs.lock().values().cloned().collect())
    }
}
