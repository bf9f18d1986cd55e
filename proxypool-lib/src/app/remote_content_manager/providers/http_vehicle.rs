use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Request, Uri, header};

use super::{ProviderVehicle, ProviderVehicleType};
use crate::common::{
    errors::{map_io_error, new_io_error},
    http::{DEFAULT_USER_AGENT, HttpClient, new_http_client},
};

pub struct Vehicle {
    pub url: Uri,
    pub path: PathBuf,
    http_client: HttpClient,
}

impl Vehicle {
    pub fn new<T: Into<Uri>, P: AsRef<Path>>(url: T, path: P) -> io::Result<Self> {
        Ok(Self {
            url: url.into(),
            path: path.as_ref().to_path_buf(),
            http_client: new_http_client()?,
        })
    }
}

#[async_trait]
impl ProviderVehicle for Vehicle {
    async fn read(&self) -> io::Result<Vec<u8>> {
        let req = Request::get(self.url.clone())
            .header(header::USER_AGENT, DEFAULT_USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(map_io_error)?;

        let res = self
            .http_client
            .request(req)
            .await
            .map_err(|e| new_io_error(format!("GET {}: {e}", self.url)))?;

        let status = res.status();
        if !status.is_success() {
            return Err(new_io_error(format!("GET {}: status {status}", self.url)));
        }

        res.into_body()
            .collect()
            .await
            .map_err(map_io_error)
            .map(|body| body.to_bytes().to_vec())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn typ(&self) -> ProviderVehicleType {
        ProviderVehicleType::Http
    }
}
