use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use super::{ProviderVehicle, ProviderVehicleType};

pub struct Vehicle {
    path: PathBuf,
}

impl Vehicle {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ProviderVehicle for Vehicle {
    async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn typ(&self) -> ProviderVehicleType {
        ProviderVehicleType::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_vehicle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.json");
        std::fs::write(&path, b"[]").unwrap();

        let v = Vehicle::new(&path);
        assert_eq!(v.read().await.unwrap(), b"[]");
        assert_eq!(v.path(), path.as_path());
        assert_eq!(v.typ(), ProviderVehicleType::File);

        let missing = Vehicle::new(dir.path().join("missing"));
        assert_eq!(
            missing.read().await.unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
