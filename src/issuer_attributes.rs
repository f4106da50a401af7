//! Issuer distinguished-name resolution
//!
//! Distinguished names travel as slash strings, one `/shortName=value` per
//! attribute in certificate order, e.g. `/CN=theVaulters/C=KR/L=Incheon/O=theVaulters`.
//! Values containing `/` cannot be represented in this form.

use openssl::x509::{X509Name, X509NameRef, X509};

use crate::error::{CaError, CaResult};
use crate::key_store::KeyStore;

/// Render a name as `/shortName=value` segments, preserving entry order
pub fn format_distinguished_name(name: &X509NameRef) -> CaResult<String> {
    let mut out = String::new();
    for entry in name.entries() {
        let object = entry.object();
        let short_name = match object.nid().short_name() {
            Ok(short) => short.to_string(),
            Err(_) => object.to_string(),
        };
        let value = entry
            .data()
            .as_utf8()
            .map_err(|e| CaError::corrupt("Failed to decode name entry", e))?;
        out.push('/');
        out.push_str(&short_name);
        out.push('=');
        out.push_str(&value);
    }
    Ok(out)
}

/// Parse a slash string back into an [`X509Name`]
pub fn parse_distinguished_name(dn: &str) -> CaResult<X509Name> {
    let body = dn.strip_prefix('/').ok_or_else(|| {
        CaError::SigningFailed(format!("Distinguished name must start with '/': {}", dn))
    })?;

    let mut builder =
        X509Name::builder().map_err(|e| CaError::signing("Failed to create name builder", e))?;
    for segment in body.split('/') {
        let (field, value) = segment
            .split_once('=')
            .filter(|(field, _)| !field.is_empty())
            .ok_or_else(|| {
                CaError::SigningFailed(format!("Malformed name segment '{}' in {}", segment, dn))
            })?;
        builder
            .append_entry_by_text(field, value)
            .map_err(|e| CaError::signing(&format!("Unknown name attribute '{}'", field), e))?;
    }
    Ok(builder.build())
}

/// Issuer DN string of the canonical CA certificate
pub async fn resolve_issuer_attributes(store: &dyn KeyStore) -> CaResult<String> {
    let record = store
        .canonical_record()
        .await?
        .ok_or(CaError::KeyRecordMissing)?;
    let certificate = X509::from_pem(record.certificate_pem.as_bytes())
        .map_err(|e| CaError::corrupt("Failed to parse stored CA certificate", e))?;
    format_distinguished_name(certificate.issuer_name())
}
