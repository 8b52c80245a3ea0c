use std::{ops::Deref, sync::Arc};

use reqwest::{Client, ClientBuilder};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

/// Shared HTTP client used for every probe issued by the validator.
///
/// Carries its own cookie store so that cookie-gated CDN endpoints behave
/// the same way they would for a real player session.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookie_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> Self {
        let cookie_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        Self {
            client: builder
                .cookie_provider(cookie_store.clone())
                .build()
                .unwrap(),
            cookie_store,
        }
    }

    /// Seeds the cookie store for `url` from a `Cookie` header style string,
    /// e.g. `"session=deadbeef; region=eu"`. Unparseable pairs are skipped.
    pub fn add_cookies(&self, cookies: &str, url: &Url) {
        let mut store = self.cookie_store.lock().unwrap();
        for cookie in cookies.split(';') {
            _ = store.parse(cookie.trim(), url);
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Client::builder())
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_cookies_seeds_the_store() {
        let client = HttpClient::default();
        let url = Url::parse("https://cdn.example.com/").unwrap();
        client.add_cookies("session=deadbeef; region=eu; not a cookie", &url);

        let store = client.cookie_store.lock().unwrap();
        assert!(store.get("cdn.example.com", "/", "session").is_some());
        assert!(store.get("cdn.example.com", "/", "region").is_some());
        assert_eq!(store.iter_any().count(), 2);
    }
}
