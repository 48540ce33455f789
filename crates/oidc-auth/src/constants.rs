//! OAuth2 / OIDC protocol constants
//!
//! Parameter values defined by RFC 6749, RFC 7636, RFC 7523 and RFC 8693.

/// PKCE challenge method. Plain challenges are never sent.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Grant type for the authorization code exchange
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Grant type for refreshing an access token
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Grant type for signed-assertion (anonymous and biometric) logins
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Grant type for exchanging a refresh token for an app session token
pub const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Subject token type used when the refresh token is the exchange subject
pub const TOKEN_TYPE_REFRESH_TOKEN: &str = "urn:ietf:params:oauth:token-type:refresh_token";

/// Requested token type for app session tokens
pub const TOKEN_TYPE_APP_SESSION: &str = "urn:openid:params:token-type:app-session";

/// Token type hint sent with revocation requests
pub const TOKEN_TYPE_HINT_REFRESH: &str = "refresh_token";

/// Error code returned when a grant (code, refresh token, assertion) is rejected
pub const INVALID_GRANT: &str = "invalid_grant";

/// Error code for a malformed request or authorization response
pub const INVALID_REQUEST: &str = "invalid_request";

/// Path of the OIDC discovery document relative to the issuer
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
