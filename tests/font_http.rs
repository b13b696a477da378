//! Font fetching over real HTTP against a local server

use pagepress::fonts::{FontCache, FontFetcher, FontInjector, HttpFontFetcher};
use pagepress::{Error, FontConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Response, Server};

type Hits = Arc<Mutex<HashMap<String, usize>>>;

/// Serve a stylesheet and one font binary; returns the base URL and a hit counter per path
fn start_font_server() -> (String, Hits) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let hits: Hits = Arc::new(Mutex::new(HashMap::new()));

    let css = format!(
        "@font-face {{ font-family: 'Inter'; font-style: normal; font-weight: 400; \
         src: url({base}/files/inter-400.woff2) format('woff2'); }}\n\
         @font-face {{ font-family: 'Inter'; font-style: normal; font-weight: 700; \
         src: url({base}/files/inter-700.woff2) format('woff2'); }}",
        base = base
    );

    let counter = hits.clone();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let path = url.split('?').next().unwrap_or_default().to_string();
            *counter.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
            let response = match path.as_str() {
                "/css2" if url.contains("family=Inter") => Response::from_string(css.clone())
                    .with_header("Content-Type: text/css".parse::<Header>().unwrap()),
                "/files/inter-400.woff2" | "/files/inter-700.woff2" => {
                    Response::from_data(b"wOF2fake".to_vec())
                        .with_header("Content-Type: font/woff2".parse::<Header>().unwrap())
                }
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    (base, hits)
}

fn font_config(base: &str) -> FontConfig {
    FontConfig {
        stylesheet_url_template: format!("{}/css2?family={{family}}&display=swap", base),
        ..Default::default()
    }
}

#[test]
fn http_fetcher_reports_status_failures() {
    let (base, _) = start_font_server();
    let fetcher = HttpFontFetcher::new(&font_config(&base));
    let bytes = fetcher
        .fetch_bytes(&format!("{}/files/inter-400.woff2", base))
        .unwrap();
    assert_eq!(bytes, b"wOF2fake");

    let err = fetcher
        .fetch_text(&format!("{}/files/missing.woff2", base))
        .unwrap_err();
    match err {
        Error::FontFetch { reason, .. } => assert!(reason.contains("404")),
        other => panic!("expected font fetch error, got {:?}", other),
    }
}

#[test]
fn cache_fetches_each_url_once() {
    let (base, hits) = start_font_server();
    let config = font_config(&base);
    let cache = Arc::new(FontCache::new(
        Arc::new(HttpFontFetcher::new(&config)),
        config,
    ));
    let injector = FontInjector::new(cache.clone());

    let first = injector.build_style("Inter").unwrap();
    let second = injector.build_style("Inter").unwrap();
    assert_eq!(first, second);
    assert!(first.contains("font-weight: 400;"));
    assert!(first.contains("font-weight: 700;"));
    assert!(first.contains("data:font/woff2;base64,d09GMmZha2U="));

    let hits = hits.lock().unwrap();
    assert_eq!(hits.get("/css2"), Some(&1));
    assert_eq!(hits.get("/files/inter-400.woff2"), Some(&1));
    assert_eq!(hits.get("/files/inter-700.woff2"), Some(&1));
    assert_eq!(cache.stats().binaries, 2);
}

#[test]
fn failed_stylesheet_is_retried_on_next_use() {
    let (base, hits) = start_font_server();
    let config = font_config(&base);
    let cache = FontCache::new(Arc::new(HttpFontFetcher::new(&config)), config);

    assert!(matches!(cache.stylesheet("Comic Neue"), Err(Error::FontFetch { .. })));
    assert!(matches!(cache.stylesheet("Comic Neue"), Err(Error::FontFetch { .. })));
    assert!(!cache.contains_stylesheet("Comic Neue"));
    assert_eq!(hits.lock().unwrap().get("/css2"), Some(&2));
}

#[test]
fn warm_caches_every_face() {
    let (base, _) = start_font_server();
    let config = font_config(&base);
    let cache = Arc::new(FontCache::new(Arc::new(HttpFontFetcher::new(&config)), config));
    let faces = FontInjector::new(cache.clone()).warm("Inter").unwrap();
    assert_eq!(faces, 2);
    assert!(cache.contains_binary(&format!("{}/files/inter-700.woff2", base)));
}
