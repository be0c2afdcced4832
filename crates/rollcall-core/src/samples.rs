//! On-disk face sample storage.
//!
//! Layout: one directory per identity named `<displayName>_<rollId>`, each
//! holding `<displayName>_<index>.jpg` crops already normalized to 50×50.

use crate::classifier::LabeledSample;
use crate::face::FaceCrop;
use crate::types::Identity;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAMPLE_EXT: &str = "jpg";

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("identity with roll id {0} already exists")]
    DuplicateIdentity(u32),
    #[error("no identity with roll id {0}")]
    NotFound(u32),
    #[error("sample image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("sample storage: {0}")]
    Io(#[from] io::Error),
}

/// Root of the per-identity sample directories.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    /// Open (creating if needed) the sample root directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SampleError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All enrolled identities, ordered by roll id. Entries that do not parse
    /// as `<name>_<roll>` directories are skipped.
    pub fn identities(&self) -> Result<Vec<Identity>, SampleError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(Identity::from_dir_name) {
                Some(id) => ids.push(id),
                None => tracing::warn!(entry = ?name, "ignoring unrecognised sample directory"),
            }
        }
        ids.sort_by(|a, b| {
            a.roll_id
                .cmp(&b.roll_id)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        Ok(ids)
    }

    pub fn find(&self, roll_id: u32) -> Result<Option<Identity>, SampleError> {
        Ok(self.identities()?.into_iter().find(|id| id.roll_id == roll_id))
    }

    /// Create the sample directory for a new identity.
    ///
    /// Fails with `DuplicateIdentity` if any identity already uses the roll id.
    pub fn create(&self, identity: &Identity) -> Result<PathBuf, SampleError> {
        if self.find(identity.roll_id)?.is_some() {
            return Err(SampleError::DuplicateIdentity(identity.roll_id));
        }
        let dir = self.root.join(identity.dir_name());
        std::fs::create_dir(&dir).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SampleError::DuplicateIdentity(identity.roll_id),
            _ => SampleError::Io(e),
        })?;
        Ok(dir)
    }

    /// Write sample number `index` for `identity`.
    pub fn write(
        &self,
        identity: &Identity,
        index: usize,
        face: &FaceCrop,
    ) -> Result<PathBuf, SampleError> {
        let path = self
            .root
            .join(identity.dir_name())
            .join(format!("{}_{index}.{SAMPLE_EXT}", identity.display_name));
        face.image()
            .save(&path)
            .map_err(|source| SampleError::Image { path: path.clone(), source })?;
        Ok(path)
    }

    /// Delete an identity and all of its samples.
    pub fn remove(&self, roll_id: u32) -> Result<Identity, SampleError> {
        let identity = self.find(roll_id)?.ok_or(SampleError::NotFound(roll_id))?;
        std::fs::remove_dir_all(self.root.join(identity.dir_name()))?;
        Ok(identity)
    }

    /// Number of sample images stored for one identity.
    pub fn sample_count(&self, identity: &Identity) -> Result<usize, SampleError> {
        Ok(sample_paths(&self.root.join(identity.dir_name()))?.len())
    }

    /// Load every sample across every identity, normalized to the face size.
    pub fn load_all(&self) -> Result<Vec<LabeledSample>, SampleError> {
        let mut samples = Vec::new();
        for identity in self.identities()? {
            for path in sample_paths(&self.root.join(identity.dir_name()))? {
                let img = image::open(&path)
                    .map_err(|source| SampleError::Image { path: path.clone(), source })?
                    .to_luma8();
                samples.push(LabeledSample {
                    identity: identity.clone(),
                    pixels: FaceCrop::normalize(img).pixels().to_vec(),
                });
            }
        }
        Ok(samples)
    }
}

fn sample_paths(dir: &Path) -> Result<Vec<PathBuf>, SampleError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::FACE_SIZE;
    use image::{GrayImage, Luma};

    fn face(value: u8) -> FaceCrop {
        FaceCrop::normalize(GrayImage::from_pixel(FACE_SIZE, FACE_SIZE, Luma([value])))
    }

    #[test]
    fn test_create_rejects_duplicate_roll() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).unwrap();
        store.create(&Identity::new("ada", 7)).unwrap();

        // Same roll under a different name is still a duplicate.
        assert!(matches!(
            store.create(&Identity::new("bob", 7)),
            Err(SampleError::DuplicateIdentity(7))
        ));
    }

    #[test]
    fn test_write_and_load_samples() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).unwrap();
        let ada = Identity::new("ada", 1);
        store.create(&ada).unwrap();
        let path = store.write(&ada, 0, &face(120)).unwrap();
        store.write(&ada, 1, &face(120)).unwrap();

        assert!(path.ends_with("ada_1/ada_0.jpg"));
        assert_eq!(store.sample_count(&ada).unwrap(), 2);

        let samples = store.load_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.identity == ada));
        assert!(samples.iter().all(|s| s.pixels.len() == (FACE_SIZE * FACE_SIZE) as usize));
    }

    #[test]
    fn test_identities_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).unwrap();
        store.create(&Identity::new("zed", 3)).unwrap();
        store.create(&Identity::new("ada", 1)).unwrap();
        std::fs::create_dir(dir.path().join("not-an-identity")).unwrap();
        std::fs::write(dir.path().join("stray_9"), b"file").unwrap();

        let rolls: Vec<u32> = store.identities().unwrap().iter().map(|i| i.roll_id).collect();
        assert_eq!(rolls, vec![1, 3]);
    }

    #[test]
    fn test_remove_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).unwrap();
        let ada = Identity::new("ada", 1);
        store.create(&ada).unwrap();
        store.write(&ada, 0, &face(10)).unwrap();

        assert_eq!(store.remove(1).unwrap(), ada);
        assert!(store.identities().unwrap().is_empty());
        assert!(matches!(store.remove(1), Err(SampleError::NotFound(1))));
    }
}
