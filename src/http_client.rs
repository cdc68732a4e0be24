use anyhow::{bail, Result};
use embedded_svc::http::client::Client;
use embedded_svc::http::Method;
use embedded_svc::io::Write;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use log::info;

use crate::debug_flags::{self, DEBUG_REPORT};
use crate::report::{CycleVitals, Reporter};

const TIMEOUT_MS: u64 = 10_000;

fn make_config() -> Configuration {
    Configuration {
        timeout: Some(std::time::Duration::from_millis(TIMEOUT_MS)),
        use_global_ca_store: true,
        crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
        ..Default::default()
    }
}

/// POST a JSON body on a fresh connection and return the response status.
/// The connection and its TLS context are released before returning.
pub fn http_post_json(url: &str, body: &str) -> Result<u16> {
    let free_internal = unsafe {
        esp_idf_sys::heap_caps_get_free_size(esp_idf_sys::MALLOC_CAP_INTERNAL)
    };
    log::log!(
        debug_flags::level(&DEBUG_REPORT),
        "HTTP post: internal SRAM free = {} KB",
        free_internal / 1024
    );

    let connection = EspHttpConnection::new(&make_config())?;
    let mut client = Client::wrap(connection);

    let content_length = body.len().to_string();
    let headers = [
        ("content-type", "application/json"),
        ("content-length", content_length.as_str()),
    ];
    let mut request = client.request(Method::Post, url, &headers)?;
    request.write_all(body.as_bytes())?;
    request.flush()?;
    let response = request.submit()?;

    let status = response.status();
    info!(
        "HTTP POST {} -> status {}",
        url.chars().take(80).collect::<String>(),
        status
    );
    Ok(status)
}

/// Posts cycle results to the collector's `/variables` endpoint.
pub struct HttpReporter {
    url: String,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Reporter for HttpReporter {
    fn report(&mut self, vitals: &CycleVitals) -> Result<u16> {
        let status = http_post_json(&self.url, &vitals.to_json()?)?;
        if !(200..300).contains(&status) {
            bail!("collector returned HTTP {}", status);
        }
        Ok(status)
    }
}
