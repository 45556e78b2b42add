use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claim set carried by the console's bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Claims {
    /// Expiry as seconds since the unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub can_manage_users: bool,
    #[serde(default)]
    pub can_manage_transactions: bool,
    #[serde(default)]
    pub can_generate_certificates: bool,
    #[serde(default)]
    pub can_manage_residents: bool,
    #[serde(default)]
    pub can_bulk_operations: bool,
    #[serde(default)]
    pub can_access_logs: bool,
}

/// Admin capability flags a protected operation may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ManageUsers,
    ManageTransactions,
    GenerateCertificates,
    ManageResidents,
    BulkOperations,
    AccessLogs,
}

impl Permission {
    pub fn name(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "can_manage_users",
            Permission::ManageTransactions => "can_manage_transactions",
            Permission::GenerateCertificates => "can_generate_certificates",
            Permission::ManageResidents => "can_manage_residents",
            Permission::BulkOperations => "can_bulk_operations",
            Permission::AccessLogs => "can_access_logs",
        }
    }
}

impl Claims {
    pub fn grants(&self, permission: Permission) -> bool {
        match permission {
            Permission::ManageUsers => self.can_manage_users,
            Permission::ManageTransactions => self.can_manage_transactions,
            Permission::GenerateCertificates => self.can_generate_certificates,
            Permission::ManageResidents => self.can_manage_residents,
            Permission::BulkOperations => self.can_bulk_operations,
            Permission::AccessLogs => self.can_access_logs,
        }
    }
}

/// Decodes an opaque bearer token without checking its signature.
///
/// The token is issued and verified by the auth service; the console only
/// reads its claims. Returns `None` for anything that is not a well-formed
/// token.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token.trim(), &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// Whether `token` is present, well formed and expires strictly after `now`
/// (seconds since the unix epoch). A token without an expiry is rejected.
pub fn is_valid_at(token: Option<&str>, now: u64) -> bool {
    token
        .and_then(decode_claims)
        .and_then(|claims| claims.exp)
        .is_some_and(|exp| exp > now)
}

pub fn is_valid(token: Option<&str>) -> bool {
    is_valid_at(token, unix_now())
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) fn token_with(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"issued-elsewhere"),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_claims() {
        let token = token_with(&Claims {
            exp: Some(2_000_000_000),
            role: Some("admin".to_owned()),
            can_generate_certificates: true,
            ..Default::default()
        });

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert!(claims.grants(Permission::GenerateCertificates));
        assert!(!claims.grants(Permission::ManageUsers));
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(decode_claims(""), None);
        assert_eq!(decode_claims("not.a.token"), None);
        assert_eq!(decode_claims("abc"), None);
        assert!(!is_valid(None));
        assert!(!is_valid(Some("garbage")));
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let token = token_with(&Claims {
            exp: Some(1_000),
            ..Default::default()
        });

        assert!(is_valid_at(Some(&token), 999));
        assert!(!is_valid_at(Some(&token), 1_000));
        assert!(!is_valid_at(Some(&token), 1_001));

        let no_expiry = token_with(&Claims::default());
        assert!(!is_valid_at(Some(&no_expiry), 0));
    }
}
