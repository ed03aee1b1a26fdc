//! Holder-side presentation: keep only the disclosures for the fields the
//! holder chooses to reveal. The JWT bytes never change.

use super::{Disclosure, split};
use crate::error::Error;

/// Reduce an SD-JWT to the chosen disclosures.
///
/// Field names with no matching disclosure are ignored; the issued trailing
/// `~` is preserved.
///
/// # Errors
///
/// `Error::InvalidJwt` on a malformed SD-JWT, `Error::DisclosureMismatch`
/// when a carried disclosure cannot be decoded.
pub fn present(sd_jwt: &str, reveal: &[&str]) -> Result<String, Error> {
    let (jwt, disclosures) = split(sd_jwt)?;

    let mut out = jwt.to_string();
    for encoded in disclosures {
        let disclosure = Disclosure::parse(encoded)?;
        if reveal.contains(&disclosure.name.as_str()) {
            out.push('~');
            out.push_str(encoded);
        }
    }
    out.push('~');
    Ok(out)
}
