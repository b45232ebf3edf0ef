use google_drive3::{hyper, hyper_rustls, DriveHub};
use hyper_rustls::HttpsConnectorBuilder;
use std::path::PathBuf;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

type Connector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Builds the OAuth application secret from the client id/secret baked
/// in at compile time by `build.rs`.
fn application_secret() -> ApplicationSecret {
    ApplicationSecret {
        client_id: env!("GOOGLE_CLIENT_ID").to_string(),
        client_secret: env!("GOOGLE_CLIENT_SECRET").to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        redirect_uris: vec!["http://localhost:34115/oauth2callback".to_string()],
        ..Default::default()
    }
}

/// Builds an authenticated `DriveHub`, persisting the OAuth token at
/// `token_path` (mode 0600 enforced by `AuthGate::persist_token` after
/// the fact). Triggers the browser consent flow only when no valid
/// token is cached on disk.
pub async fn create_drive_hub(token_path: PathBuf) -> Result<DriveHub<Connector>, Box<dyn std::error::Error>> {
    let connector = HttpsConnectorBuilder::new().with_native_roots().https_or_http().enable_http1().enable_http2().build();
    let client = hyper::Client::builder().build(connector.clone());

    let authenticator: Authenticator<Connector> = InstalledFlowAuthenticator::builder(application_secret(), InstalledFlowReturnMethod::HTTPRedirect)
        .persist_tokens_to_disk(token_path)
        .hyper_client(client.clone())
        .build()
        .await?;

    Ok(DriveHub::new(client, authenticator))
}
