//! Client identity extraction from certificate subjects.

use crate::error::{TransportError, TransportResult};

const UID_OID: &str = "0.9.2342.19200300.100.1.1";
const CN_OID: &str = "2.5.4.3";

/// Split an RFC 4514 distinguished name into `(attribute, value)` pairs.
///
/// Handles backslash escapes and multi-valued RDNs (`+`).
fn parse_dn(subject: &str) -> TransportResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut attr = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = subject.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| {
                    TransportError::InvalidCredential("dangling escape in subject".to_string())
                })?;
                if in_value {
                    value.push(escaped);
                } else {
                    attr.push(escaped);
                }
            }
            '=' if !in_value => in_value = true,
            ',' | '+' | ';' => {
                if !in_value {
                    return Err(TransportError::InvalidCredential(format!(
                        "attribute without value in subject: {subject}"
                    )));
                }
                pairs.push((attr.trim().to_string(), value.trim().to_string()));
                attr.clear();
                value.clear();
                in_value = false;
            }
            c if in_value => value.push(c),
            c => attr.push(c),
        }
    }

    if in_value {
        pairs.push((attr.trim().to_string(), value.trim().to_string()));
    } else if !attr.trim().is_empty() {
        return Err(TransportError::InvalidCredential(format!(
            "attribute without value in subject: {subject}"
        )));
    }
    Ok(pairs)
}

fn find_attr<'a>(pairs: &'a [(String, String)], names: &[&str]) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(attr, value)| {
            !value.is_empty() && names.iter().any(|n| attr.eq_ignore_ascii_case(n))
        })
        .map(|(_, value)| value.as_str())
}

/// Extract a client identity from a certificate subject.
///
/// The `UID` attribute wins; `CN` is the fallback. A subject with neither is
/// rejected.
pub fn identity_from_subject(subject: &str) -> TransportResult<String> {
    let pairs = parse_dn(subject)?;
    find_attr(&pairs, &["UID", "userid", UID_OID])
        .or_else(|| find_attr(&pairs, &["CN", "commonName", CN_OID]))
        .map(str::to_string)
        .ok_or_else(|| {
            TransportError::InvalidCredential(format!("no UID or CN in subject: {subject}"))
        })
}

/// Build a `CN=` subject that [`identity_from_subject`] maps back to `identity`.
pub fn subject_for_identity(identity: &str) -> String {
    let mut subject = String::with_capacity(identity.len() + 3);
    subject.push_str("CN=");
    for c in identity.chars() {
        if matches!(c, ',' | '+' | ';' | '\\' | '=' | '"' | '<' | '>') {
            subject.push('\\');
        }
        subject.push(c);
    }
    subject
}
