//! PKCE challenge verification (RFC 7636)

use base64::Engine as _;
use mnema_core::CodeChallengeMethod;
use sha2::{Digest, Sha256};

/// Compute the S256 challenge for a verifier.
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Check a presented verifier against the stored challenge under its
/// declared method.
pub fn verify(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    match method {
        CodeChallengeMethod::S256 => s256_challenge(verifier) == challenge,
        CodeChallengeMethod::Plain => verifier == challenge,
    }
}

/// RFC 7636 verifier constraints: 43..=128 chars from the unreserved set.
pub fn verifier_is_well_formed(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s256_round_trip() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = s256_challenge(verifier);
        assert!(verify(CodeChallengeMethod::S256, &challenge, verifier));
        assert!(!verify(CodeChallengeMethod::S256, &challenge, "wrong-verifier-wrong-verifier-wrong-verif"));
    }

    #[test]
    fn test_s256_known_vector() {
        // RFC 7636 appendix B test vector.
        assert_eq!(
            s256_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_plain_comparison() {
        assert!(verify(CodeChallengeMethod::Plain, "abc", "abc"));
        assert!(!verify(CodeChallengeMethod::Plain, "abc", "abd"));
    }

    #[test]
    fn test_verifier_shape() {
        assert!(verifier_is_well_formed(
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"
        ));
        assert!(!verifier_is_well_formed("too-short"));
        assert!(!verifier_is_well_formed(&"a".repeat(129)));
        assert!(!verifier_is_well_formed(&format!("{}!", "a".repeat(43))));
    }
}
