use std::io::BufReader;
use std::path::Path;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls_pemfile::Item;
use tokio_rustls::rustls::{Certificate, PrivateKey};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;
use super::error::TlsError;

const PEM_LINE_WIDTH: usize = 64;

/// 개인키 PEM 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs8,
    Pkcs1,
    Sec1,
}

impl KeyFormat {
    fn label(&self) -> &'static str {
        match self {
            KeyFormat::Pkcs8 => "PRIVATE KEY",
            KeyFormat::Pkcs1 => "RSA PRIVATE KEY",
            KeyFormat::Sec1 => "EC PRIVATE KEY",
        }
    }
}

/// 인증서 체인과 개인키 한 벌
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub chain: Vec<Certificate>,
    pub key: PrivateKey,
    pub key_format: KeyFormat,
}

impl CertificateBundle {
    /// 인증서와 키가 섞인 PEM 데이터를 파싱합니다. 첫 번째 키만 사용합니다.
    pub fn from_pem(data: &[u8]) -> Result<Self, TlsError> {
        let mut reader = BufReader::new(data);
        let items = rustls_pemfile::read_all(&mut reader)?;

        let mut chain = Vec::new();
        let mut key = None;
        for item in items {
            match item {
                Item::X509Certificate(der) => chain.push(Certificate(der)),
                Item::PKCS8Key(der) if key.is_none() => key = Some((PrivateKey(der), KeyFormat::Pkcs8)),
                Item::RSAKey(der) if key.is_none() => key = Some((PrivateKey(der), KeyFormat::Pkcs1)),
                Item::ECKey(der) if key.is_none() => key = Some((PrivateKey(der), KeyFormat::Sec1)),
                _ => {}
            }
        }

        if chain.is_empty() {
            return Err(TlsError::Certificate("인증서를 찾을 수 없음".into()));
        }
        let (key, key_format) = key.ok_or_else(|| TlsError::Certificate("개인키를 찾을 수 없음".into()))?;
        Ok(Self { chain, key, key_format })
    }

    /// 인증서 파일과 개인키 파일을 읽습니다.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let mut data = std::fs::read(cert_path).map_err(|e| TlsError::load(cert_path, e))?;
        data.push(b'\n');
        data.extend(std::fs::read(key_path).map_err(|e| TlsError::load(key_path, e))?);

        Self::from_pem(&data).map_err(|e| TlsError::load(cert_path, e))
    }

    /// 개인키, 인증서 체인 순서의 PEM 문자열
    pub fn to_pem(&self) -> String {
        let mut out = String::new();
        write_pem(&mut out, self.key_format.label(), &self.key.0);
        for cert in &self.chain {
            write_pem(&mut out, "CERTIFICATE", &cert.0);
        }
        out
    }

    pub fn leaf(&self) -> Result<&Certificate, TlsError> {
        self.chain
            .first()
            .ok_or_else(|| TlsError::Certificate("빈 인증서 체인".into()))
    }

    /// 리프 인증서 만료 시각 (unix timestamp)
    pub fn not_after(&self) -> Result<i64, TlsError> {
        let (_, cert) = parse_x509_certificate(&self.leaf()?.0)
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        Ok(cert.validity().not_after.timestamp())
    }

    /// 리프 인증서가 다루는 DNS 이름 (SAN, 없으면 CN)
    pub fn dns_names(&self) -> Result<Vec<String>, TlsError> {
        let (_, cert) = parse_x509_certificate(&self.leaf()?.0)
            .map_err(|e| TlsError::Certificate(e.to_string()))?;

        let mut names: Vec<String> = cert
            .subject_alternative_name()
            .map_err(|e| TlsError::Certificate(e.to_string()))?
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if names.is_empty() {
            names.extend(
                cert.subject()
                    .iter_common_name()
                    .filter_map(|cn| cn.as_str().ok())
                    .map(str::to_ascii_lowercase),
            );
        }
        Ok(names)
    }
}

/// DER 인코딩된 SubjectPublicKeyInfo
pub fn public_key_der(cert: &Certificate) -> Result<Vec<u8>, TlsError> {
    let (_, parsed) = parse_x509_certificate(&cert.0).map_err(|e| TlsError::Certificate(e.to_string()))?;
    Ok(parsed.public_key().raw.to_vec())
}

fn write_pem(out: &mut String, label: &str, der: &[u8]) {
    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    let encoded = STANDARD.encode(der);
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 출력은 ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----\n");
}
