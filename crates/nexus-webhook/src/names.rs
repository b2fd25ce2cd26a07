//! Record and domain name derivation

/// Strip one trailing dot
pub fn un_fqdn(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Record name relative to `zone`
///
/// `("_acme-challenge.www.example.com.", "example.com.")` gives
/// `"_acme-challenge.www"`. A name outside the zone is returned whole.
pub fn extract_record_name(fqdn: &str, zone: &str) -> String {
    let name = un_fqdn(fqdn);
    let suffix = format!(".{}", un_fqdn(zone));
    match name.find(&suffix) {
        Some(idx) => name[..idx].to_string(),
        None => name.to_string(),
    }
}

/// Domain nexus manages records under, from the resolved zone
pub fn extract_domain_name(zone: &str) -> String {
    un_fqdn(zone).to_string()
}
