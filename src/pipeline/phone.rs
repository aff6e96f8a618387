//! Argentine phone normalization.
//!
//! Submissions arrive as anything from "15 4455-6677" to
//! "+54 9 11 4455 6677". Normalization strips dialing decoration,
//! reduces the digits to the ten-digit national form, resolves the area
//! code against the plan table and re-inserts the mobile marker when the
//! external classifier flags the line as mobile. The canonical form is
//! the duplicate-detection key, so every decision lands in the
//! diagnostic stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::diag::DiagnosticSink;

/// Country calling code stripped during reduction.
const CALLING_CODE: &str = "54";
/// Domestic long-distance trunk prefix.
const TRUNK_PREFIX: &str = "0";
/// Mobile indicator dialed between the country code and the area code.
const MOBILE_INDICATOR: &str = "9";
/// Marker dialed between area code and subscriber number on mobiles.
const MOBILE_MARKER: &str = "15";
/// Capital-region area code assumed for bare eight-digit numbers.
const DEFAULT_AREA_CODE: &str = "11";

const SHORT_LEN: usize = 8;
const NATIONAL_LEN: usize = 10;
const MARKED_LEN: usize = 12;

/// Reduction re-applies the rule set until nothing fires; the cap only
/// guards against a rule set that stops shrinking its input.
const REDUCTION_CAP: usize = 16;

/// Geographic area codes of the plan, two to four digits. Curated so no
/// four-digit entry extends a listed three-digit one; longest-match
/// resolution depends on that.
const AR_AREA_CODES: &[&str] = &[
    "11",
    "220", "221", "223", "230", "236", "237", "249", "260", "261", "263", "264",
    "266", "280", "291", "294", "297", "298", "299", "336", "341", "342", "343",
    "345", "351", "353", "358", "362", "364", "370", "376", "379", "380", "381",
    "383", "385", "387", "388",
    "2221", "2223", "2224", "2225", "2226", "2227", "2229", "2241", "2242",
    "2243", "2244", "2245", "2246", "2252", "2254", "2255", "2257", "2261",
    "2262", "2264", "2265", "2266", "2267", "2268", "2271", "2272", "2273",
    "2274", "2281", "2283", "2284", "2285", "2286", "2291", "2292", "2296",
    "2297", "2314", "2316", "2317", "2320", "2323", "2324", "2325", "2326",
    "2331", "2333", "2334", "2335", "2336", "2337", "2338", "2342", "2344",
    "2345", "2346", "2352", "2353", "2354", "2355", "2356", "2357", "2358",
    "2392", "2393", "2394", "2395", "2396", "2473", "2474", "2475", "2477",
    "2478", "2901", "2902", "2903", "2920", "2921", "2922", "2923", "2924",
    "2925", "2926", "2927", "2928", "2929", "2931", "2932", "2933", "2934",
    "2935", "2936", "2952", "2953", "2954", "2962", "2963", "2964", "2966",
    "3327", "3329", "3382", "3385", "3387", "3388", "3400", "3401", "3402",
    "3404", "3405", "3406", "3407", "3408", "3409", "3442", "3444", "3445",
    "3446", "3447", "3460", "3462", "3463", "3464", "3465", "3466", "3467",
    "3468", "3469", "3471", "3472", "3476", "3482", "3483", "3487", "3489",
    "3491", "3492", "3493", "3496", "3497", "3498", "3521", "3522", "3524",
    "3525", "3541", "3542", "3543", "3544", "3546", "3547", "3548", "3549",
    "3562", "3563", "3564", "3571", "3572", "3573", "3574", "3575", "3576",
    "3711", "3715", "3716", "3718", "3721", "3725", "3731", "3734", "3735",
    "3741", "3743", "3751", "3754", "3755", "3756", "3757", "3758", "3772",
    "3773", "3774", "3775", "3777", "3781", "3782", "3786", "3821", "3825",
    "3826", "3827", "3841", "3843", "3844", "3845", "3846", "3861", "3862",
    "3863", "3865", "3867", "3868", "3869", "3891", "3892", "3894",
];

/// Area codes known to the numbering plan.
#[derive(Clone, Debug)]
pub struct AreaCodeTable {
    codes: std::collections::HashSet<String>,
}

impl AreaCodeTable {
    pub fn argentina() -> Self {
        Self::from_codes(AR_AREA_CODES.iter().copied())
    }

    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Longest listed code prefixing `digits`, trying four, three, then
    /// two digits.
    pub fn longest_prefix<'a>(&self, digits: &'a str) -> Option<&'a str> {
        for len in [4, 3, 2] {
            if digits.len() > len {
                let code = &digits[..len];
                if self.contains(code) {
                    return Some(code);
                }
            }
        }
        None
    }
}

/// Why a number failed normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhoneReject {
    UnsupportedCountry,
    NoDigits,
    UnexpectedLength(usize),
    MarkerNotFound,
    UnknownAreaCode,
}

impl PhoneReject {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedCountry => "UNSUPPORTED_COUNTRY",
            Self::NoDigits => "NO_DIGITS",
            Self::UnexpectedLength(_) => "UNEXPECTED_LENGTH",
            Self::MarkerNotFound => "MOBILE_MARKER_NOT_FOUND",
            Self::UnknownAreaCode => "UNKNOWN_AREA_CODE",
        }
    }
}

impl std::fmt::Display for PhoneReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedLength(n) => write!(f, "{} ({n} digits)", self.code()),
            _ => f.write_str(self.code()),
        }
    }
}

/// Result of one normalization. The original input is always preserved
/// alongside the cleaned form for audit.
#[derive(Clone, Debug)]
pub struct PhoneOutcome {
    pub is_valid: bool,
    pub original: String,
    pub cleaned: String,
    pub formatted: Option<String>,
    /// `Some` once the classifier ran; rejects before that stay `None`.
    pub is_mobile: Option<bool>,
    pub reason: Option<PhoneReject>,
}

impl PhoneOutcome {
    fn rejected(original: &str, cleaned: String, reason: PhoneReject) -> Self {
        Self {
            is_valid: false,
            original: original.to_string(),
            cleaned,
            formatted: None,
            is_mobile: None,
            reason: Some(reason),
        }
    }
}

/// External mobile-line classifier.
#[async_trait]
pub trait MobileLookup: Send + Sync {
    /// `None` when the service could not classify within its attempts.
    async fn classify(&self, national: &str) -> Option<bool>;
}

/// Classifier backed by an HTTP service returning `{"mobile": bool}`.
/// Calls carry a hard per-call timeout and a bounded attempt count;
/// running out of attempts is an answer (`None`), never an error.
pub struct HttpMobileLookup {
    client: reqwest::Client,
    endpoint: String,
    max_attempts: u32,
}

#[derive(Deserialize)]
struct LookupBody {
    mobile: bool,
}

impl HttpMobileLookup {
    pub const DEFAULT_ATTEMPTS: u32 = 10;
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(endpoint: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Self::CALL_TIMEOUT)
            .user_agent(concat!("leadgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            max_attempts: Self::DEFAULT_ATTEMPTS,
        })
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[async_trait]
impl MobileLookup for HttpMobileLookup {
    async fn classify(&self, national: &str) -> Option<bool> {
        for attempt in 1..=self.max_attempts {
            let sent = self
                .client
                .get(&self.endpoint)
                .query(&[("number", national)])
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => match resp.json::<LookupBody>().await {
                    Ok(body) => return Some(body.mobile),
                    Err(err) => {
                        tracing::debug!(attempt, error = %err, "mobile lookup body unreadable")
                    }
                },
                Ok(resp) => {
                    tracing::debug!(attempt, status = %resp.status(), "mobile lookup non-success")
                }
                Err(err) => tracing::debug!(attempt, error = %err, "mobile lookup call failed"),
            }
        }
        None
    }
}

/// Classifier used when no lookup endpoint is configured; every number
/// assembles as a landline.
pub struct NoLookup;

#[async_trait]
impl MobileLookup for NoLookup {
    async fn classify(&self, _national: &str) -> Option<bool> {
        None
    }
}

/// Fixed-answer classifier for tests and offline runs.
#[cfg(any(test, feature = "mock"))]
pub struct FixedLookup(pub Option<bool>);

#[cfg(any(test, feature = "mock"))]
#[async_trait]
impl MobileLookup for FixedLookup {
    async fn classify(&self, _national: &str) -> Option<bool> {
        self.0
    }
}

/// One pass of the reduction rules; returns the input untouched when no
/// rule applies.
fn reduce_once(digits: &str) -> &str {
    if digits.len() > NATIONAL_LEN {
        if let Some(rest) = digits.strip_prefix(CALLING_CODE) {
            return rest;
        }
    }
    if let Some(rest) = digits.strip_prefix(TRUNK_PREFIX) {
        return rest;
    }
    if digits.len() > NATIONAL_LEN {
        if let Some(rest) = digits.strip_prefix(MOBILE_INDICATOR) {
            return rest;
        }
    }
    digits
}

/// Applies the rule set until it stops shrinking the number.
fn reduce(digits: &str) -> &str {
    let mut current = digits;
    for _ in 0..REDUCTION_CAP {
        let next = reduce_once(current);
        if next.len() == current.len() {
            return current;
        }
        current = next;
    }
    current
}

/// For a stable twelve-digit number, locates a known area code followed
/// by the mobile marker and removes the marker.
fn excise_marker(table: &AreaCodeTable, digits: &str) -> Option<String> {
    for len in [4, 3, 2] {
        let code = &digits[..len];
        if table.contains(code) && digits[len..].starts_with(MOBILE_MARKER) {
            return Some(format!("{}{}", code, &digits[len + MOBILE_MARKER.len()..]));
        }
    }
    None
}

fn plan_supports(country: &str) -> bool {
    country.eq_ignore_ascii_case("AR") || country.eq_ignore_ascii_case("Argentina")
}

pub struct PhoneNormalizer {
    table: AreaCodeTable,
    lookup: Arc<dyn MobileLookup>,
    diag: Arc<dyn DiagnosticSink>,
}

impl PhoneNormalizer {
    pub fn new(
        table: AreaCodeTable,
        lookup: Arc<dyn MobileLookup>,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            table,
            lookup,
            diag,
        }
    }

    /// Normalizes one raw phone. Never errors; rejection is a value.
    pub async fn normalize(
        &self,
        raw: &str,
        country: &str,
        affiliate_id: i64,
        publisher_id: Option<&str>,
    ) -> PhoneOutcome {
        let cleaned: String = raw.chars().filter(char::is_ascii_digit).collect();
        let publisher = publisher_id.unwrap_or("-");

        if !plan_supports(country) {
            self.diag.append(&format!(
                "phone reject reason=UNSUPPORTED_COUNTRY country={country} \
                 affiliate={affiliate_id} publisher={publisher} original=\"{raw}\""
            ));
            return PhoneOutcome::rejected(raw, cleaned, PhoneReject::UnsupportedCountry);
        }

        if cleaned.is_empty() {
            self.diag.append(&format!(
                "phone reject reason=NO_DIGITS affiliate={affiliate_id} \
                 publisher={publisher} original=\"{raw}\""
            ));
            return PhoneOutcome::rejected(raw, cleaned, PhoneReject::NoDigits);
        }

        let reduced = reduce(&cleaned).to_string();

        let national = match reduced.len() {
            SHORT_LEN => format!("{DEFAULT_AREA_CODE}{reduced}"),
            NATIONAL_LEN => reduced.clone(),
            MARKED_LEN => match excise_marker(&self.table, &reduced) {
                Some(national) => national,
                None => {
                    self.diag.append(&format!(
                        "phone reject reason=MOBILE_MARKER_NOT_FOUND digits={reduced} \
                         affiliate={affiliate_id} publisher={publisher} original=\"{raw}\""
                    ));
                    return PhoneOutcome::rejected(raw, cleaned, PhoneReject::MarkerNotFound);
                }
            },
            other => {
                self.diag.append(&format!(
                    "phone reject reason=UNEXPECTED_LENGTH count={other} cleaned={cleaned} \
                     affiliate={affiliate_id} publisher={publisher} original=\"{raw}\""
                ));
                return PhoneOutcome::rejected(raw, cleaned, PhoneReject::UnexpectedLength(other));
            }
        };

        let Some(area) = self.table.longest_prefix(&national) else {
            self.diag.append(&format!(
                "phone reject reason=UNKNOWN_AREA_CODE tried={}/{}/{} \
                 affiliate={affiliate_id} publisher={publisher} original=\"{raw}\"",
                &national[..4.min(national.len())],
                &national[..3.min(national.len())],
                &national[..2.min(national.len())],
            ));
            return PhoneOutcome::rejected(raw, cleaned, PhoneReject::UnknownAreaCode);
        };
        let area = area.to_string();
        let subscriber = national[area.len()..].to_string();

        let classified = self.lookup.classify(&national).await;
        if classified.is_none() {
            self.diag.append(&format!(
                "phone lookup-exhausted number={national} affiliate={affiliate_id}"
            ));
        }
        let is_mobile = classified.unwrap_or(false);

        let formatted = if is_mobile {
            format!("{area}{MOBILE_MARKER}{subscriber}")
        } else {
            national.clone()
        };

        if !self.recheck(&formatted) {
            self.diag.append(&format!(
                "phone reject reason=UNKNOWN_AREA_CODE area={area} assembled={formatted} \
                 affiliate={affiliate_id} publisher={publisher} original=\"{raw}\""
            ));
            return PhoneOutcome {
                is_valid: false,
                original: raw.to_string(),
                cleaned,
                formatted: None,
                is_mobile: Some(is_mobile),
                reason: Some(PhoneReject::UnknownAreaCode),
            };
        }

        self.diag.append(&format!(
            "phone accept formatted={formatted} area={area} mobile={is_mobile} \
             cleaned={cleaned} affiliate={affiliate_id} publisher={publisher} original=\"{raw}\""
        ));

        PhoneOutcome {
            is_valid: true,
            original: raw.to_string(),
            cleaned,
            formatted: Some(formatted),
            is_mobile: Some(is_mobile),
            reason: None,
        }
    }

    /// Re-validates the assembled number against the table: a known area
    /// prefix, the marker when twelve digits, nothing else.
    fn recheck(&self, formatted: &str) -> bool {
        let Some(area) = self.table.longest_prefix(formatted) else {
            return false;
        };
        match formatted.len() {
            NATIONAL_LEN => true,
            MARKED_LEN => formatted[area.len()..].starts_with(MOBILE_MARKER),
            _ => false,
        }
    }
}
