use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
});

// Generation calls stay in flight until the provider answers.
static GENERATION_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .build()
        .expect("Failed to build generation HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}

pub fn get_generation_client() -> &'static Client {
    &GENERATION_CLIENT
}
