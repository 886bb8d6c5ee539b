// src/normalize.rs
//! Pure field normalizers shared by every fetcher and the reconciler.
//!
//! All of these are side-effect free and never return an error to the
//! caller: a value that cannot be normalized becomes `None` (dates, money)
//! or `Unknown` (status, modality). The multi-format date cascade is an
//! explicit ordered table so priority is documented and testable.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{BiddingStatus, Modality};

/// Lower-case and strip the Portuguese diacritics that show up in source
/// payloads, so substring rules can be written once, unaccented.
pub fn fold_text(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'Á' | 'À' | 'Â' | 'Ã' => 'a',
            'é' | 'ê' | 'É' | 'Ê' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'ô' | 'õ' | 'Ó' | 'Ô' | 'Õ' => 'o',
            'ú' | 'ü' | 'Ú' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            _ => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Collapse whitespace runs and trim.
pub fn squash_ws(s: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    RE_WS.replace_all(s, " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Datetime formats tried in priority order, after RFC 3339.
/// Sources mix ISO, SQL-style and Brazilian day-first layouts.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Bare-date formats, tried after the datetime table.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Parse a timestamp from any of the supported formats. Returns `None` on
/// total failure; never panics or errors.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // 1) Full RFC 3339 with offset.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // 2) Naive datetime formats in table order; assume UTC.
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // 3) Bare dates, midnight UTC.
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }

    // 4) Best effort: a trailing "Z" or fractional seconds some portals
    // emit without a proper offset.
    let stripped = s.trim_end_matches('Z');
    if stripped != s {
        return parse_datetime(stripped);
    }
    if let Some((head, _frac)) = s.split_once('.') {
        if head.len() >= 19 {
            return parse_datetime(head);
        }
    }

    None
}

/// Strict date-only formatter for outbound API query parameters.
pub fn to_query_date(dt: &DateTime<Utc>, fmt: QueryDateFormat) -> String {
    match fmt {
        QueryDateFormat::Ymd => dt.format("%Y%m%d").to_string(),
        QueryDateFormat::IsoDate => dt.format("%Y-%m-%d").to_string(),
        QueryDateFormat::BrSlash => dt.format("%d/%m/%Y").to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum QueryDateFormat {
    /// `20250131` — PNCP style.
    Ymd,
    /// `2025-01-31` — compras.gov.br style.
    IsoDate,
    /// `31/01/2025` — Portal da Transparência style.
    BrSlash,
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Parse a currency string into a non-negative amount.
///
/// Brazilian convention: when both `.` and `,` appear, `.` groups thousands
/// and `,` is the decimal separator ("R$ 1.234,56"). A lone `,` is a decimal
/// separator. Anything non-numeric after cleanup yields `None`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    static RE_KEEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.,\-]").unwrap());
    let cleaned = RE_KEEP.replace_all(raw, "").to_string();
    if cleaned.is_empty() {
        return None;
    }

    let normalized = if cleaned.contains('.') && cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else if cleaned.contains(',') {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    let value: f64 = normalized.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Status / modality mapping
// ---------------------------------------------------------------------------

/// Ordered substring rules, most specific first. Several source texts are
/// ambiguous substrings of each other, so the generic "encerrad" fallback
/// must come after the homologation/adjudication rules.
const STATUS_RULES: &[(&str, BiddingStatus)] = &[
    ("homologad", BiddingStatus::Finished),
    ("adjudicad", BiddingStatus::Finished),
    ("concluid", BiddingStatus::Finished),
    ("revogad", BiddingStatus::Canceled),
    ("anulad", BiddingStatus::Canceled),
    ("cancelad", BiddingStatus::Canceled),
    ("fracassad", BiddingStatus::Canceled),
    ("desert", BiddingStatus::Canceled),
    ("suspens", BiddingStatus::Pending),
    ("em andamento", BiddingStatus::Active),
    ("recebendo proposta", BiddingStatus::Active),
    ("em disputa", BiddingStatus::Active),
    ("aberta", BiddingStatus::Active),
    ("aberto", BiddingStatus::Active),
    ("publicad", BiddingStatus::Pending),
    ("divulgad", BiddingStatus::Pending),
    ("agendad", BiddingStatus::Pending),
    ("a realizar", BiddingStatus::Pending),
    // Generic fallback, tested last on purpose.
    ("encerrad", BiddingStatus::Finished),
];

pub fn map_status(raw: &str) -> BiddingStatus {
    let folded = fold_text(raw);
    for (needle, status) in STATUS_RULES {
        if folded.contains(needle) {
            return *status;
        }
    }
    BiddingStatus::Unknown
}

const MODALITY_RULES: &[(&str, Modality)] = &[
    ("pregao eletronico", Modality::PregaoEletronico),
    ("pregao presencial", Modality::PregaoPresencial),
    // Bare "pregão" is overwhelmingly electronic nowadays.
    ("pregao", Modality::PregaoEletronico),
    ("concorrencia", Modality::Concorrencia),
    ("tomada de preco", Modality::TomadaPrecos),
    ("convite", Modality::Convite),
    ("leilao", Modality::Leilao),
    ("concurso", Modality::Concurso),
    ("dispensa", Modality::Dispensa),
    ("inexigibilidade", Modality::Inexigibilidade),
    ("rdc", Modality::Rdc),
    ("regime diferenciado", Modality::Rdc),
    ("credenciamento", Modality::Credenciamento),
    ("dialogo competitivo", Modality::DialogoCompetitivo),
];

pub fn map_modality(raw: &str) -> Modality {
    let folded = fold_text(raw);
    for (needle, modality) in MODALITY_RULES {
        if folded.contains(needle) {
            return *modality;
        }
    }
    Modality::Unknown
}

// ---------------------------------------------------------------------------
// Bidding-number cleanup
// ---------------------------------------------------------------------------

/// Source-specific cleanup applied before the number becomes a dedup/lookup
/// key: strip a leading agency-code prefix ("928394 - 123/2025") and any
/// trailing parenthetical note ("123/2025 (retificada)").
pub fn clean_bidding_number(source_key: &str, raw: &str) -> String {
    static RE_AGENCY_PREFIX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*\d{4,}\s*-\s*").unwrap());
    static RE_TRAILING_PAREN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*$").unwrap());

    let mut out = squash_ws(raw);
    // Licitações-e prefixes rows with the internal auction id.
    if source_key == "licitacoes_e" {
        out = RE_AGENCY_PREFIX.replace(&out, "").to_string();
    }
    out = RE_TRAILING_PAREN.replace(&out, "").to_string();
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn datetime_formats_in_priority_order() {
        let iso = parse_datetime("2025-03-01T10:30:00-03:00").unwrap();
        assert_eq!(iso.hour_min(), (13, 30));

        let sql = parse_datetime("2025-03-01 10:30:00").unwrap();
        assert_eq!(sql.hour_min(), (10, 30));

        let br = parse_datetime("01/03/2025 10:30").unwrap();
        assert_eq!((br.day(), br.month()), (1, 3));

        let bare = parse_datetime("01/03/2025").unwrap();
        assert_eq!((bare.day(), bare.month(), bare.year()), (1, 3, 2025));
    }

    trait HourMin {
        fn hour_min(&self) -> (u32, u32);
    }
    impl HourMin for DateTime<Utc> {
        fn hour_min(&self) -> (u32, u32) {
            use chrono::Timelike;
            (self.hour(), self.minute())
        }
    }

    #[test]
    fn unparseable_dates_yield_none() {
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("amanhã cedo").is_none());
        assert!(parse_datetime("31/31/2025").is_none());
    }

    #[test]
    fn trailing_z_is_tolerated() {
        assert!(parse_datetime("2025-03-01T10:30:00Z").is_some());
    }

    #[test]
    fn currency_brazilian_convention() {
        assert_eq!(parse_currency("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_currency("1234.56"), Some(1234.56));
        assert_eq!(parse_currency("1.234.567,89"), Some(1234567.89));
        assert_eq!(parse_currency("12,5"), Some(12.5));
        assert_eq!(parse_currency("abc"), None);
        assert_eq!(parse_currency(""), None);
    }

    #[test]
    fn negative_money_is_rejected() {
        assert_eq!(parse_currency("-10,00"), None);
    }

    #[test]
    fn status_specific_rules_win_over_generic() {
        assert_eq!(map_status("Homologada"), BiddingStatus::Finished);
        assert_eq!(map_status("Adjudicada/Homologada"), BiddingStatus::Finished);
        assert_eq!(map_status("Aberto p/ Lances"), BiddingStatus::Active);
        assert_eq!(map_status("Encerrada"), BiddingStatus::Finished);
        assert_eq!(map_status("Revogada"), BiddingStatus::Canceled);
        assert_eq!(map_status("Sessão Suspensa"), BiddingStatus::Pending);
        assert_eq!(map_status("???"), BiddingStatus::Unknown);
    }

    #[test]
    fn modality_mapping_handles_accents() {
        assert_eq!(map_modality("Pregão Eletrônico"), Modality::PregaoEletronico);
        assert_eq!(map_modality("PREGÃO PRESENCIAL"), Modality::PregaoPresencial);
        assert_eq!(map_modality("Tomada de Preços"), Modality::TomadaPrecos);
        assert_eq!(map_modality("Diálogo Competitivo"), Modality::DialogoCompetitivo);
        assert_eq!(map_modality("sei lá"), Modality::Unknown);
    }

    #[test]
    fn bidding_number_cleanup() {
        assert_eq!(
            clean_bidding_number("licitacoes_e", "1023948 - 45/2025"),
            "45/2025"
        );
        assert_eq!(
            clean_bidding_number("pncp", "90012/2025 (retificado)"),
            "90012/2025"
        );
        assert_eq!(clean_bidding_number("pncp", "  12/2025  "), "12/2025");
    }
}
