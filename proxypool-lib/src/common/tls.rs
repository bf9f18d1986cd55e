use std::sync::{Arc, LazyLock};

use rustls::{ClientConfig, RootCertStore, crypto::CryptoProvider};

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("either the `ring` or the `aws-lc-rs` feature must be enabled");

pub static GLOBAL_ROOT_STORE: LazyLock<Arc<RootCertStore>> =
    LazyLock::new(global_root_store);

fn global_root_store() -> Arc<RootCertStore> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    Arc::new(root_store)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    if let Some(provider) = CryptoProvider::get_default() {
        return provider.clone();
    }
    #[cfg(feature = "aws-lc-rs")]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
    #[cfg(all(feature = "ring", not(feature = "aws-lc-rs")))]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }
}

/// Client config trusting the bundled web pki roots.
pub fn client_config(alpn: &[&[u8]]) -> Result<ClientConfig, rustls::Error> {
    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(GLOBAL_ROOT_STORE.clone())
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}
