use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::config::GeoConfig;

/// Accepted spellings of the single supported country. Anything else
/// short-circuits the whole stage; the deployment is deliberately
/// single-country.
const COUNTRY_VARIANTS: [&str; 4] = ["казахстан", "kazakhstan", "kz", "қазақстан"];

const GEOCODER_TIMEOUT: Duration = Duration::from_secs(4);

/// Branch office coordinates, keyed by office name. Backs nearest-office
/// resolution when a tenant's office rows carry no coordinates of their own.
pub static OFFICE_COORDS: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("Алматы", (43.222, 76.8512)),
        ("Астана", (51.1801, 71.446)),
        ("Шымкент", (42.3417, 69.5901)),
        ("Атырау", (47.1167, 51.8833)),
        ("Актобе", (50.2797, 57.2073)),
        ("Павлодар", (52.2873, 76.9674)),
        ("Усть-Каменогорск", (49.9839, 82.6143)),
        ("Семей", (50.4112, 80.2275)),
        ("Тараз", (42.9, 71.3667)),
        ("Костанай", (53.2144, 63.6246)),
        ("Кызылорда", (44.8479, 65.5092)),
        ("Уральск", (51.2333, 51.3667)),
        ("Актау", (43.6417, 51.2)),
        ("Петропавловск", (54.875, 69.1611)),
        ("Кокшетау", (53.2844, 69.3961)),
    ])
});

/// City-centre coordinates used when the external geocoder is unavailable.
/// Keys are lowercase and include historical names and latin transliterations.
static CITY_FALLBACK: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("алматы", (43.222, 76.8512)),
        ("алма-ата", (43.222, 76.8512)),
        ("almaty", (43.222, 76.8512)),
        ("астана", (51.1801, 71.446)),
        ("astana", (51.1801, 71.446)),
        ("нур-султан", (51.1801, 71.446)),
        ("нурсултан", (51.1801, 71.446)),
        ("шымкент", (42.3417, 69.5901)),
        ("атырау", (47.1167, 51.8833)),
        ("актобе", (50.2797, 57.2073)),
        ("павлодар", (52.2873, 76.9674)),
        ("семей", (50.4112, 80.2275)),
        ("тараз", (42.9, 71.3667)),
        ("костанай", (53.2144, 63.6246)),
    ])
});

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Great-circle distance in kilometres.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// City-centre lookup, case-insensitive with bidirectional substring match
/// ("г. Алматы" hits "алматы", "семей" hits "Семейская область" input).
pub fn city_centre(city: &str) -> Option<(f64, f64)> {
    let key = city.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    CITY_FALLBACK
        .iter()
        .find(|(variant, _)| key.contains(*variant) || variant.contains(key.as_str()))
        .map(|(_, coords)| *coords)
}

fn country_supported(country: Option<&str>) -> bool {
    match country {
        Some(c) => COUNTRY_VARIANTS.contains(&c.trim().to_lowercase().as_str()),
        None => false,
    }
}

/// Resolves an address to coordinates.
///
/// Order: country gate → external search (4 s timeout) → static city table
/// → `None`. Every failure collapses into the next step; this stage never
/// surfaces an error to the pipeline.
pub async fn geocode_address(
    config: &GeoConfig,
    http: &reqwest::Client,
    country: Option<&str>,
    city: Option<&str>,
    street: Option<&str>,
    house: Option<&str>,
) -> Option<(f64, f64)> {
    if !country_supported(country) {
        return None;
    }

    if city.is_some() || street.is_some() {
        match search_external(config, http, city, street, house).await {
            Ok(Some(point)) => return Some(point),
            Ok(None) => debug!("[Geo] external search returned no hits"),
            Err(err) => warn!("[Geo] external search failed: {err}"),
        }
    }

    city.and_then(city_centre)
}

async fn search_external(
    config: &GeoConfig,
    http: &reqwest::Client,
    city: Option<&str>,
    street: Option<&str>,
    house: Option<&str>,
) -> Result<Option<(f64, f64)>, reqwest::Error> {
    let query = [street, house, city, Some("Kazakhstan")]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(", ");

    let hits: Vec<SearchHit> = http
        .get(&config.search_url)
        .query(&[("q", query.as_str()), ("format", "json"), ("limit", "1")])
        .header(reqwest::header::USER_AGENT, &config.user_agent)
        .timeout(GEOCODER_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(hits.first().and_then(|hit| {
        match (hit.lat.parse::<f64>(), hit.lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Some((lat, lon)),
            _ => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn geo_config(url: &str) -> GeoConfig {
        let mut config = AppConfig::from_env().geo;
        config.search_url = url.to_string();
        config
    }

    #[test]
    fn haversine_almaty_to_astana() {
        let (a_lat, a_lon) = OFFICE_COORDS["Алматы"];
        let (s_lat, s_lon) = OFFICE_COORDS["Астана"];
        let km = haversine(a_lat, a_lon, s_lat, s_lon);
        // Straight-line distance is roughly 960 km.
        assert!((900.0..1050.0).contains(&km), "got {km}");
    }

    #[test]
    fn haversine_zero_distance() {
        assert!(haversine(43.222, 76.8512, 43.222, 76.8512).abs() < 1e-9);
    }

    #[test]
    fn city_centre_matches_substring_case_insensitive() {
        assert_eq!(city_centre("г. АЛМАТЫ"), Some((43.222, 76.8512)));
        assert_eq!(city_centre("Нур-Султан"), Some((51.1801, 71.446)));
        assert_eq!(city_centre("Paris"), None);
        assert_eq!(city_centre("   "), None);
    }

    #[tokio::test]
    async fn unsupported_country_short_circuits() {
        let config = geo_config("http://127.0.0.1:1/search");
        let http = reqwest::Client::new();
        let got = geocode_address(
            &config,
            &http,
            Some("Germany"),
            Some("Берлин"),
            None,
            None,
        )
        .await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn unreachable_geocoder_falls_back_to_city_table() {
        // Port 1 refuses connections; the static table must answer.
        let config = geo_config("http://127.0.0.1:1/search");
        let http = reqwest::Client::new();
        let got = geocode_address(&config, &http, Some("KZ"), Some("almaty"), None, None).await;
        assert_eq!(got, Some((43.222, 76.8512)));

        let got = geocode_address(&config, &http, Some("KZ"), Some("алматы"), None, None).await;
        assert_eq!(got, Some((43.222, 76.8512)));
    }

    #[tokio::test]
    async fn external_hit_wins_over_fallback() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"lat":"43.25","lon":"76.95"}]"#)
            .create_async()
            .await;

        let config = geo_config(&format!("{}/search", server.url()));
        let http = reqwest::Client::new();
        let got = geocode_address(
            &config,
            &http,
            Some("Казахстан"),
            Some("Алматы"),
            Some("Абая"),
            Some("10"),
        )
        .await;

        mock.assert_async().await;
        assert_eq!(got, Some((43.25, 76.95)));
    }

    #[tokio::test]
    async fn garbage_payload_falls_back() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let config = geo_config(&format!("{}/search", server.url()));
        let http = reqwest::Client::new();
        let got = geocode_address(&config, &http, Some("kz"), Some("Тараз"), None, None).await;
        assert_eq!(got, Some((42.9, 71.3667)));
    }
}
