//! Throwaway PKI for tests: self-signed server and client identities laid
//! out the way the binaries expect them under `auth/`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tempfile::TempDir;

use crate::config::EndpointIdentity;

/// PEM and DER forms of a freshly generated certificate.
pub struct GeneratedCert {
    pub cert_pem: String,
    pub key_pem:  String,
    pub cert_der: Vec<u8>,
}

fn generate(subject: Option<&str>, sans: &[&str]) -> GeneratedCert {
    let key_pair = KeyPair::generate().expect("generate key pair");
    let sans: Vec<String> = sans.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(sans).expect("certificate params");

    params.distinguished_name = DistinguishedName::new();
    if let Some(common_name) = subject {
        params.distinguished_name.push(DnType::CommonName, common_name);
    }

    let cert = params.self_signed(&key_pair).expect("self-sign certificate");
    GeneratedCert {
        cert_pem: cert.pem(),
        key_pem:  key_pair.serialize_pem(),
        cert_der: cert.der().to_vec(),
    }
}

/// Self-signed end-entity certificate with `CN=<common_name>`.
pub fn self_signed(common_name: &str, sans: &[&str]) -> GeneratedCert {
    generate(Some(common_name), sans)
}

/// Self-signed certificate whose subject is empty.
pub fn self_signed_without_subject(sans: &[&str]) -> GeneratedCert {
    generate(None, sans)
}

/// Temporary `auth/` tree holding a matching server/client pair.
pub struct TestPki {
    dir: TempDir,
}

impl TestPki {
    /// Writes `server.{crt,key}` and `clients/client.{crt,key}`. The server
    /// certificate is valid for `localhost` and `127.0.0.1`.
    pub fn generate() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path();

        let server = self_signed("mtls-echo-server", &["localhost", "127.0.0.1"]);
        write_pair(root, "server", &server);

        let client = self_signed("mtls-echo-client", &["mtls-echo-client"]);
        write_pair(&root.join("clients"), "client", &client);

        Self { dir }
    }

    /// Root of the generated tree
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn server_identity(&self) -> EndpointIdentity {
        EndpointIdentity::server_in(self.path())
    }

    pub fn client_identity(&self) -> EndpointIdentity {
        EndpointIdentity::client_in(self.path())
    }

    /// A client identity the server has never seen. It still trusts the real
    /// server certificate so only the server side can reject it.
    pub fn untrusted_client_identity(&self) -> EndpointIdentity {
        let dir = self.path().join("untrusted");
        let rogue = self_signed("mtls-echo-client", &["mtls-echo-client"]);
        let (cert_path, key_path) = write_pair(&dir, "client", &rogue);
        EndpointIdentity::new(cert_path, key_path, self.path().join("server.crt"))
    }

    /// A server identity the client does not trust. It accepts the real
    /// client certificate so only the client side can reject it.
    pub fn untrusted_server_identity(&self) -> EndpointIdentity {
        let dir = self.path().join("impostor");
        let impostor = self_signed("mtls-echo-server", &["localhost", "127.0.0.1"]);
        let (cert_path, key_path) = write_pair(&dir, "server", &impostor);
        EndpointIdentity::new(
            cert_path,
            key_path,
            self.path().join("clients").join("client.crt"),
        )
    }
}

fn write_pair(dir: &Path, stem: &str, generated: &GeneratedCert) -> (PathBuf, PathBuf) {
    fs::create_dir_all(dir).expect("create identity dir");
    let cert_path = dir.join(format!("{stem}.crt"));
    let key_path = dir.join(format!("{stem}.key"));
    fs::write(&cert_path, &generated.cert_pem).expect("write certificate");
    fs::write(&key_path, &generated.key_pem).expect("write key");
    (cert_path, key_path)
}
