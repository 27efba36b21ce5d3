use crate::error::PersistenceError;

/// Splits a DN into its RDN components, honouring `\,` escapes.
pub fn split_rdns(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                parts.push(dn[start..i].trim());
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    let tail = dn[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Key used by the relational backend: the value of the first RDN.
///
/// `inum=1234,ou=people,o=jans` → `1234`
pub fn to_key(dn: &str) -> Result<String, PersistenceError> {
    let first = split_rdns(dn)
        .into_iter()
        .next()
        .filter(|rdn| !rdn.is_empty())
        .ok_or_else(|| PersistenceError::Mapping(format!("DN is empty: '{dn}'")))?;
    let (_, value) = first
        .split_once('=')
        .ok_or_else(|| PersistenceError::Mapping(format!("malformed RDN '{first}' in DN '{dn}'")))?;
    let value = value.trim().replace('\\', "");
    if value.is_empty() {
        return Err(PersistenceError::Mapping(format!("RDN value is empty in DN '{dn}'")));
    }
    Ok(value)
}

pub fn normalize(dn: &str) -> String {
    split_rdns(dn)
        .into_iter()
        .map(|rdn| match rdn.split_once('=') {
            Some((name, value)) => format!("{}={}", name.trim().to_ascii_lowercase(), value.trim().to_ascii_lowercase()),
            None => rdn.to_ascii_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parent(dn: &str) -> Option<String> {
    let rdns = split_rdns(dn);
    if rdns.len() < 2 {
        return None;
    }
    Some(rdns[1..].join(","))
}

/// True when `dn` equals `base` or sits anywhere below it.
pub fn is_descendant_or_self(dn: &str, base: &str) -> bool {
    let dn = normalize(dn);
    let base = normalize(base);
    if base.is_empty() {
        return true;
    }
    dn == base || dn.ends_with(&format!(",{base}"))
}
