//! Quipbot Content Providers
//!
//! Thin reqwest clients for the public APIs behind the fun commands:
//! jokes, weather, quotes, cat/dog pictures, trivia, QR codes, link
//! shortening and timezone lookup.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const ERROR_SNIPPET_CHARS: usize = 200;
const QR_IMAGE_SIZE: &str = "300x300";
const HTTP_NOT_FOUND: u16 = 404;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unexpected payload: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} has no result for '{query}'")]
    NotFound {
        provider: &'static str,
        query: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Timeout { provider }
            | ProviderError::Request { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::NotFound { provider, .. } => provider,
        }
    }

    fn malformed(provider: &'static str, detail: impl std::fmt::Display) -> Self {
        ProviderError::Malformed {
            provider,
            detail: truncate_for_error(&detail.to_string(), ERROR_SNIPPET_CHARS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joke {
    pub setup: String,
    pub punchline: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weather {
    pub city: String,
    pub temp_c: String,
    pub condition: String,
    pub humidity: String,
    pub wind_kmph: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub text: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriviaQuestion {
    pub category: String,
    pub difficulty: String,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneInfo {
    pub timezone: String,
    pub datetime: String,
    pub utc_offset: String,
    pub abbreviation: String,
}

/// Everything the bot handlers need from the outside world.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn joke(&self) -> Result<Joke, ProviderError>;
    async fn weather(&self, city: &str) -> Result<Weather, ProviderError>;
    async fn quote(&self) -> Result<Quote, ProviderError>;
    /// `Ok(None)` when the API answered but had no picture.
    async fn cat_image(&self) -> Result<Option<String>, ProviderError>;
    async fn dog_image(&self) -> Result<Option<String>, ProviderError>;
    async fn trivia(&self) -> Result<TriviaQuestion, ProviderError>;
    /// Pure URL builder, the QR service renders the image on fetch.
    fn qr_image_url(&self, data: &str) -> String;
    async fn shorten(&self, url: &str) -> Result<String, ProviderError>;
    async fn timezone(&self, zone: &str) -> Result<TimezoneInfo, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub joke: String,
    pub weather: String,
    pub quote: String,
    pub cat: String,
    pub dog: String,
    pub trivia: String,
    pub qr: String,
    pub shorten: String,
    pub timezone: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            joke: "https://official-joke-api.appspot.com/random_joke".to_string(),
            weather: "https://wttr.in".to_string(),
            quote: "https://zenquotes.io/api/random".to_string(),
            cat: "https://api.thecatapi.com/v1/images/search".to_string(),
            dog: "https://api.thedogapi.com/v1/images/search".to_string(),
            trivia: "https://opentdb.com/api.php".to_string(),
            qr: "https://api.qrserver.com/v1/create-qr-code/".to_string(),
            shorten: "https://is.gd/create.php".to_string(),
            timezone: "https://worldtimeapi.org/api/timezone".to_string(),
        }
    }
}

pub struct HttpContentProvider {
    client: Client,
    endpoints: Endpoints,
}

impl HttpContentProvider {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("quipbot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoints })
    }

    async fn get_text(&self, provider: &'static str, url: &str) -> Result<String, ProviderError> {
        tracing::debug!(provider, url, "Provider request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| request_error(provider, source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| request_error(provider, source))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                provider,
                status: status.as_u16(),
                body: truncate_for_error(&body, ERROR_SNIPPET_CHARS),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn joke(&self) -> Result<Joke, ProviderError> {
        let body = self.get_text("joke", &self.endpoints.joke).await?;
        parse_joke(&body)
    }

    async fn weather(&self, city: &str) -> Result<Weather, ProviderError> {
        let url = format!(
            "{}/{}?format=j1",
            self.endpoints.weather.trim_end_matches('/'),
            urlencoding::encode(city)
        );
        match self.get_text("weather", &url).await {
            Err(ProviderError::Status { status, .. }) if status == HTTP_NOT_FOUND => {
                Err(ProviderError::NotFound {
                    provider: "weather",
                    query: city.to_string(),
                })
            }
            other => parse_weather(city, &other?),
        }
    }

    async fn quote(&self) -> Result<Quote, ProviderError> {
        let body = self.get_text("quote", &self.endpoints.quote).await?;
        parse_quote(&body)
    }

    async fn cat_image(&self) -> Result<Option<String>, ProviderError> {
        let body = self.get_text("cat", &self.endpoints.cat).await?;
        parse_image_url("cat", &body)
    }

    async fn dog_image(&self) -> Result<Option<String>, ProviderError> {
        let body = self.get_text("dog", &self.endpoints.dog).await?;
        parse_image_url("dog", &body)
    }

    async fn trivia(&self) -> Result<TriviaQuestion, ProviderError> {
        let url = url::Url::parse_with_params(
            &self.endpoints.trivia,
            &[("amount", "1"), ("type", "multiple"), ("encode", "url3986")],
        )
        .map_err(|e| ProviderError::malformed("trivia", e))?;
        let body = self.get_text("trivia", url.as_str()).await?;
        parse_trivia(&body)
    }

    fn qr_image_url(&self, data: &str) -> String {
        build_qr_url(&self.endpoints.qr, data)
    }

    async fn shorten(&self, long_url: &str) -> Result<String, ProviderError> {
        let url = url::Url::parse_with_params(
            &self.endpoints.shorten,
            &[("format", "simple"), ("url", long_url)],
        )
        .map_err(|e| ProviderError::malformed("shorten", e))?;
        let body = self.get_text("shorten", url.as_str()).await?;
        parse_short_link(&body)
    }

    async fn timezone(&self, zone: &str) -> Result<TimezoneInfo, ProviderError> {
        let path = zone
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}/{}", self.endpoints.timezone.trim_end_matches('/'), path);
        match self.get_text("timezone", &url).await {
            Err(ProviderError::Status { status, .. }) if status == HTTP_NOT_FOUND => {
                Err(ProviderError::NotFound {
                    provider: "timezone",
                    query: zone.to_string(),
                })
            }
            other => parse_timezone(&other?),
        }
    }
}

fn request_error(provider: &'static str, source: reqwest::Error) -> ProviderError {
    if source.is_timeout() {
        ProviderError::Timeout { provider }
    } else {
        ProviderError::Request { provider, source }
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// --- Response payloads ---

#[derive(Debug, Deserialize)]
struct JokePayload {
    setup: String,
    punchline: String,
}

#[derive(Debug, Deserialize)]
struct WeatherPayload {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    humidity: String,
    #[serde(rename = "windspeedKmph")]
    windspeed_kmph: String,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: String,
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    q: String,
    a: String,
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TriviaPayload {
    response_code: i64,
    #[serde(default)]
    results: Vec<TriviaResult>,
}

#[derive(Debug, Deserialize)]
struct TriviaResult {
    #[serde(default)]
    category: String,
    #[serde(default)]
    difficulty: String,
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TimezonePayload {
    timezone: String,
    datetime: String,
    utc_offset: String,
    #[serde(default)]
    abbreviation: String,
}

pub fn parse_joke(body: &str) -> Result<Joke, ProviderError> {
    let payload: JokePayload =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed("joke", e))?;
    Ok(Joke {
        setup: payload.setup,
        punchline: payload.punchline,
    })
}

pub fn parse_weather(city: &str, body: &str) -> Result<Weather, ProviderError> {
    let payload: WeatherPayload =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed("weather", e))?;
    let current = payload
        .current_condition
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed("weather", "empty current_condition"))?;
    let condition = current
        .weather_desc
        .into_iter()
        .next()
        .map(|desc| desc.value.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(Weather {
        city: city.to_string(),
        temp_c: current.temp_c,
        condition,
        humidity: current.humidity,
        wind_kmph: current.windspeed_kmph,
    })
}

pub fn parse_quote(body: &str) -> Result<Quote, ProviderError> {
    let payload: Vec<QuotePayload> =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed("quote", e))?;
    let first = payload
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed("quote", "empty quote list"))?;
    Ok(Quote {
        text: first.q.trim().to_string(),
        author: first.a.trim().to_string(),
    })
}

pub fn parse_image_url(
    provider: &'static str,
    body: &str,
) -> Result<Option<String>, ProviderError> {
    let payload: Vec<ImagePayload> =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed(provider, e))?;
    Ok(payload
        .into_iter()
        .next()
        .and_then(|image| image.url)
        .filter(|url| !url.trim().is_empty()))
}

/// Parses an `encode=url3986` trivia response, percent-decoding every field.
pub fn parse_trivia(body: &str) -> Result<TriviaQuestion, ProviderError> {
    let payload: TriviaPayload =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed("trivia", e))?;
    if payload.response_code != 0 {
        return Err(ProviderError::malformed(
            "trivia",
            format!("response_code {}", payload.response_code),
        ));
    }
    let result = payload
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed("trivia", "no questions returned"))?;

    let incorrect_answers = result
        .incorrect_answers
        .iter()
        .map(|answer| decode_field(answer))
        .collect::<Result<Vec<_>, _>>()?;
    if incorrect_answers.is_empty() {
        return Err(ProviderError::malformed("trivia", "no incorrect answers"));
    }

    Ok(TriviaQuestion {
        category: decode_field(&result.category)?,
        difficulty: decode_field(&result.difficulty)?,
        question: decode_field(&result.question)?,
        correct_answer: decode_field(&result.correct_answer)?,
        incorrect_answers,
    })
}

fn decode_field(raw: &str) -> Result<String, ProviderError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ProviderError::malformed("trivia", e))
}

pub fn parse_short_link(body: &str) -> Result<String, ProviderError> {
    let link = body.trim();
    if link.starts_with("http://") || link.starts_with("https://") {
        Ok(link.to_string())
    } else {
        Err(ProviderError::malformed("shorten", link))
    }
}

pub fn parse_timezone(body: &str) -> Result<TimezoneInfo, ProviderError> {
    let payload: TimezonePayload =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed("timezone", e))?;
    Ok(TimezoneInfo {
        timezone: payload.timezone,
        datetime: payload.datetime,
        utc_offset: payload.utc_offset,
        abbreviation: payload.abbreviation,
    })
}

pub fn build_qr_url(base: &str, data: &str) -> String {
    match url::Url::parse_with_params(base, &[("size", QR_IMAGE_SIZE), ("data", data)]) {
        Ok(url) => url.to_string(),
        Err(_) => format!(
            "{}?size={}&data={}",
            base,
            QR_IMAGE_SIZE,
            urlencoding::encode(data)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_joke_reads_setup_and_punchline() {
        let body = r#"{"type":"general","setup":"Why?","punchline":"Because.","id":1}"#;
        let joke = parse_joke(body).expect("joke");
        assert_eq!(joke.setup, "Why?");
        assert_eq!(joke.punchline, "Because.");
    }

    #[test]
    fn parse_joke_rejects_missing_fields() {
        let err = parse_joke(r#"{"setup":"only half"}"#).expect_err("malformed");
        assert!(matches!(err, ProviderError::Malformed { provider: "joke", .. }));
    }

    #[test]
    fn parse_weather_extracts_current_condition() {
        let body = r#"{
            "current_condition": [{
                "temp_C": "18",
                "humidity": "72",
                "windspeedKmph": "11",
                "weatherDesc": [{"value": "Partly cloudy "}]
            }],
            "weather": []
        }"#;
        let weather = parse_weather("Rome", body).expect("weather");
        assert_eq!(weather.city, "Rome");
        assert_eq!(weather.temp_c, "18");
        assert_eq!(weather.condition, "Partly cloudy");
        assert_eq!(weather.humidity, "72");
        assert_eq!(weather.wind_kmph, "11");
    }

    #[test]
    fn parse_weather_rejects_empty_condition_list() {
        assert!(parse_weather("X", r#"{"current_condition": []}"#).is_err());
    }

    #[test]
    fn parse_quote_takes_first_entry() {
        let body = r#"[{"q":"Stay hungry. ","a":"Steve Jobs","h":"<b>"}]"#;
        let quote = parse_quote(body).expect("quote");
        assert_eq!(quote.text, "Stay hungry.");
        assert_eq!(quote.author, "Steve Jobs");
    }

    #[test]
    fn parse_image_url_handles_empty_list() {
        assert_eq!(parse_image_url("cat", "[]").expect("ok"), None);
        let body = r#"[{"id":"a1","url":"https://cdn2.thecatapi.com/images/a1.jpg"}]"#;
        assert_eq!(
            parse_image_url("cat", body).expect("ok").as_deref(),
            Some("https://cdn2.thecatapi.com/images/a1.jpg")
        );
    }

    #[test]
    fn parse_trivia_decodes_url3986_fields() {
        let body = r#"{
            "response_code": 0,
            "results": [{
                "type": "multiple",
                "difficulty": "easy",
                "category": "Geography",
                "question": "What%20is%20the%20capital%20of%20France%3F",
                "correct_answer": "Paris",
                "incorrect_answers": ["London", "Berlin", "S%C3%A3o%20Paulo"]
            }]
        }"#;
        let trivia = parse_trivia(body).expect("trivia");
        assert_eq!(trivia.question, "What is the capital of France?");
        assert_eq!(trivia.correct_answer, "Paris");
        assert_eq!(
            trivia.incorrect_answers,
            vec!["London", "Berlin", "São Paulo"]
        );
        assert_eq!(trivia.category, "Geography");
    }

    #[test]
    fn parse_trivia_rejects_non_zero_response_code() {
        let body = r#"{"response_code": 1, "results": []}"#;
        assert!(matches!(
            parse_trivia(body),
            Err(ProviderError::Malformed { provider: "trivia", .. })
        ));
    }

    #[test]
    fn parse_short_link_requires_url() {
        assert_eq!(
            parse_short_link("https://is.gd/abc\n").expect("link"),
            "https://is.gd/abc"
        );
        assert!(parse_short_link("Error: Please enter a valid URL").is_err());
    }

    #[test]
    fn parse_timezone_reads_fields() {
        let body = r#"{"abbreviation":"CET","datetime":"2024-01-01T12:00:00.000000+01:00","timezone":"Europe/Paris","utc_offset":"+01:00"}"#;
        let tz = parse_timezone(body).expect("tz");
        assert_eq!(tz.timezone, "Europe/Paris");
        assert_eq!(tz.utc_offset, "+01:00");
        assert_eq!(tz.abbreviation, "CET");
    }

    #[test]
    fn qr_url_encodes_data() {
        let url = build_qr_url("https://api.qrserver.com/v1/create-qr-code/", "hello world&x=1");
        assert!(url.starts_with("https://api.qrserver.com/v1/create-qr-code/?"));
        assert!(url.contains("size=300x300"));
        assert!(url.contains("data=hello+world%26x%3D1"));
    }

    #[test]
    fn truncate_for_error_limits_length() {
        let long = "x".repeat(500);
        let truncated = truncate_for_error(&long, 10);
        assert_eq!(truncated, format!("{}...", "x".repeat(10)));
    }

    #[test]
    fn provider_error_reports_its_source() {
        let err = ProviderError::NotFound {
            provider: "weather",
            query: "Atlantis".to_string(),
        };
        assert_eq!(err.provider(), "weather");
        assert_eq!(err.to_string(), "weather has no result for 'Atlantis'");
    }
}
