//! Builds the rustls configurations both endpoints share one of per process.
//!
//! The negotiable suites are exactly ECDHE-ECDSA-AES256-GCM-SHA384 and
//! ECDHE-RSA-AES256-GCM-SHA384, which pins the protocol to TLS 1.2. The only
//! trust anchor is the counterpart's certificate; the system store is never
//! consulted.

use std::{fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    crypto::{aws_lc_rs, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    version, ClientConfig, RootCertStore, ServerConfig, SupportedCipherSuite,
};
use rustls_pemfile::{certs, private_key};

use crate::{
    config::EndpointIdentity,
    error::{Error, Result},
};

/// The two AES-256-GCM suites either side will negotiate.
pub fn allowed_cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    ]
}

fn restricted_provider() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider {
        cipher_suites: allowed_cipher_suites(),
        ..aws_lc_rs::default_provider()
    })
}

/// Server-side context: presents `cert_path`/`key_path` and requires a client
/// certificate signed by (or equal to) the certificate in `trusted_path`.
pub fn server_config(identity: &EndpointIdentity) -> Result<Arc<ServerConfig>> {
    tracing::info!("Building server TLS context:");
    tracing::info!("  - Certificate: {:?}", identity.cert_path);
    tracing::info!("  - Private key: {:?}", identity.key_path);
    tracing::info!("  - Trusted client: {:?}", identity.trusted_path);

    let cert_chain = load_certs(&identity.cert_path)?;
    let key = load_private_key(&identity.key_path)?;
    let roots = load_trust_anchor(&identity.trusted_path)?;
    let provider = restricted_provider();

    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| Error::config(&identity.trusted_path, e))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&version::TLS12])
        .map_err(|e| Error::config(&identity.cert_path, e))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::config(&identity.key_path, e))?;

    Ok(Arc::new(config))
}

/// Client-side context: presents `cert_path`/`key_path` and verifies the
/// server against the certificate in `trusted_path`, including its name.
pub fn client_config(identity: &EndpointIdentity) -> Result<Arc<ClientConfig>> {
    tracing::info!("Building client TLS context:");
    tracing::info!("  - Certificate: {:?}", identity.cert_path);
    tracing::info!("  - Private key: {:?}", identity.key_path);
    tracing::info!("  - Trusted server: {:?}", identity.trusted_path);

    let cert_chain = load_certs(&identity.cert_path)?;
    let key = load_private_key(&identity.key_path)?;
    let roots = load_trust_anchor(&identity.trusted_path)?;

    let config = ClientConfig::builder_with_provider(restricted_provider())
        .with_protocol_versions(&[&version::TLS12])
        .map_err(|e| Error::config(&identity.cert_path, e))?
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| Error::config(&identity.key_path, e))?;

    Ok(Arc::new(config))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::config(path, format!("failed to read: {e}")))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_file(path)?;
    let chain = certs(&mut BufReader::new(&*pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(path, format!("failed to parse certificate: {e}")))?;

    if chain.is_empty() {
        return Err(Error::config(path, "no certificate found"));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_file(path)?;
    private_key(&mut BufReader::new(&*pem))
        .map_err(|e| Error::config(path, format!("failed to parse private key: {e}")))?
        .ok_or_else(|| Error::config(path, "no private key found"))
}

fn load_trust_anchor(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(load_certs(path)?);

    if roots.is_empty() {
        return Err(Error::config(path, "no usable trust anchor"));
    }
    Ok(roots)
}
