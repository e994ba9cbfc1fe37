//! Authorization request construction.
//!
//! Every request asks for offline access with a forced consent prompt, so the
//! provider issues a refresh token even when the user has connected before.

use crate::config::ClientConfig;

/// Query parameters sent with every authorization request besides the per-request ones
const FIXED_PARAMS: [(&str, &str); 4] = [
    ("response_type", "code"),
    ("access_type", "offline"),
    ("prompt", "consent"),
    ("include_granted_scopes", "false"),
];

/// Build the provider URL the browser is redirected to
///
/// # Arguments
/// * `client` - Registered OAuth client
/// * `redirect_uri` - Callback URI; the code exchange must send the same value
/// * `scopes` - Full scope URLs, joined with spaces
/// * `state` - Single-use session nonce
pub fn build_authorize_url(
    client: &ClientConfig,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> String {
    let scope = scopes.join(" ");
    let mut query = format!(
        "client_id={}&redirect_uri={}&scope={}&state={}",
        urlencoding::encode(&client.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scope),
        urlencoding::encode(state)
    );
    for (name, value) in FIXED_PARAMS {
        query.push('&');
        query.push_str(name);
        query.push('=');
        query.push_str(value);
    }

    let separator = if client.auth_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", client.auth_url, separator, query)
}
