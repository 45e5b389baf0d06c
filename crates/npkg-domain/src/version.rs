use semver::Version;
use tracing::debug;

/// Whether `candidate` is strictly newer than `current` under semantic
/// version precedence (never lexical order).
///
/// A candidate that fails to parse can never advance a pointer; a stored
/// pointer that fails to parse yields to any well-formed candidate.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let Ok(parsed_candidate) = Version::parse(candidate) else {
        debug!(version = candidate, "ignoring unparseable candidate version");
        return false;
    };
    match Version::parse(current) {
        Ok(parsed_current) => parsed_candidate > parsed_current,
        Err(_) => {
            debug!(
                version = current,
                "stored version is unparseable, candidate wins"
            );
            true
        }
    }
}
