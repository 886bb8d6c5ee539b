// src/fetch/pncp.rs
//! Fetcher for the PNCP public-consultation API.
//!
//! Listing endpoint: `/contratacoes/publicacao` with a date window and
//! pagination; an empty window comes back as `204 No Content`, which is a
//! legitimate zero-result response, not a shape error. Detail lookups use
//! the `numeroControlePNCP` control number (`CNPJ-1-SEQ/ANO`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::fetch::{send_with_retry, SourceFetcher};
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use crate::normalize::{
    clean_bidding_number, map_modality, map_status, parse_datetime, to_query_date, QueryDateFormat,
};
use crate::sources;

const PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct Listing {
    data: Option<Vec<Item>>,
    #[serde(rename = "totalRegistros")]
    total_registros: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(rename = "numeroCompra")]
    numero_compra: Option<String>,
    #[serde(rename = "anoCompra")]
    ano_compra: Option<i32>,
    #[serde(rename = "objetoCompra")]
    objeto_compra: Option<String>,
    #[serde(rename = "informacaoComplementar")]
    informacao_complementar: Option<String>,
    #[serde(rename = "modalidadeNome")]
    modalidade_nome: Option<String>,
    #[serde(rename = "situacaoCompraNome")]
    situacao_compra_nome: Option<String>,
    #[serde(rename = "valorTotalEstimado")]
    valor_total_estimado: Option<serde_json::Value>,
    #[serde(rename = "dataAberturaProposta")]
    data_abertura_proposta: Option<String>,
    #[serde(rename = "dataEncerramentoProposta")]
    data_encerramento_proposta: Option<String>,
    #[serde(rename = "dataPublicacaoPncp")]
    data_publicacao_pncp: Option<String>,
    #[serde(rename = "numeroControlePNCP")]
    numero_controle_pncp: Option<String>,
    #[serde(rename = "linkSistemaOrigem")]
    link_sistema_origem: Option<String>,
}

pub struct PncpFetcher {
    client: Client,
    config: AppConfig,
}

impl PncpFetcher {
    pub fn new(client: Client, config: AppConfig) -> Self {
        Self { client, config }
    }

    fn descriptor() -> &'static sources::SourceDescriptor {
        sources::get("pncp").expect("pncp descriptor registered")
    }

    fn normalize_item(item: Item) -> Option<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let mut rec = NormalizedBiddingRecord::for_source(desc.key, desc.display_name);

        let raw_number = match (&item.numero_compra, item.ano_compra) {
            (Some(n), Some(year)) => format!("{n}/{year}"),
            (Some(n), None) => n.clone(),
            (None, _) => item.numero_controle_pncp.clone().unwrap_or_default(),
        };
        rec.bidding_number = clean_bidding_number(desc.key, &raw_number);
        if rec.bidding_number.is_empty() {
            warn!(source = desc.key, "item without bidding number dropped");
            return None;
        }

        rec.title = item.objeto_compra.clone().unwrap_or_default();
        rec.description = item
            .informacao_complementar
            .or(item.objeto_compra)
            .unwrap_or_default();
        rec.modality = map_modality(item.modalidade_nome.as_deref().unwrap_or(""));
        rec.status = map_status(item.situacao_compra_nome.as_deref().unwrap_or(""));
        rec.estimated_value = money_from_value(item.valor_total_estimado.as_ref());
        rec.opening_date = item.data_abertura_proposta.as_deref().and_then(parse_datetime);
        rec.closing_date = item
            .data_encerramento_proposta
            .as_deref()
            .and_then(parse_datetime);
        rec.publication_date = item.data_publicacao_pncp.as_deref().and_then(parse_datetime);
        rec.url_source = item.link_sistema_origem.or_else(|| {
            item.numero_controle_pncp
                .as_deref()
                .map(|c| format!("https://pncp.gov.br/app/editais/{c}"))
        });
        Some(rec)
    }

    fn normalize_body(body: &str) -> Result<Vec<NormalizedBiddingRecord>> {
        let listing: Listing =
            serde_json::from_str(body).context("PNCP response is not the expected JSON shape")?;
        let items = match listing.data {
            Some(items) => items,
            None if listing.total_registros == Some(0) => Vec::new(),
            None => {
                return Err(anyhow!(
                    "PNCP response has no 'data' array (keys changed upstream?)"
                ))
            }
        };
        Ok(items.into_iter().filter_map(Self::normalize_item).collect())
    }
}

/// The API documents the estimate as a number but some integrations ship it
/// as a formatted string; accept both.
fn money_from_value(v: Option<&serde_json::Value>) -> Option<f64> {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().filter(|x| *x >= 0.0),
        Some(serde_json::Value::String(s)) => crate::normalize::parse_currency(s),
        _ => None,
    }
}

#[async_trait]
impl SourceFetcher for PncpFetcher {
    fn key(&self) -> &'static str {
        "pncp"
    }

    async fn fetch(&self, filters: &SearchFilters) -> SearchResult {
        let desc = Self::descriptor();
        let end = filters.end_date.unwrap_or_else(Utc::now);
        let start = filters.start_date.unwrap_or(end - Duration::days(30));
        let page = filters.page.unwrap_or(1);

        let request = self
            .client
            .get(desc.listing_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("dataInicial", to_query_date(&start, QueryDateFormat::Ymd)),
                ("dataFinal", to_query_date(&end, QueryDateFormat::Ymd)),
                ("pagina", page.to_string()),
                (
                    "tamanhoPagina",
                    filters.effective_limit().min(PAGE_SIZE).to_string(),
                ),
            ]);

        let response = match send_with_retry(
            request,
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return SearchResult::failed(format!("PNCP request failed: {e:#}")),
        };

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return SearchResult::ok("PNCP returned no listings for the window", Vec::new());
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return SearchResult::failed(format!("PNCP body read failed: {e}")),
        };

        match Self::normalize_body(&body) {
            Ok(mut records) => {
                if let Some(number) = &filters.bidding_number {
                    records.retain(|r| r.bidding_number.contains(number.trim()));
                }
                debug!(count = records.len(), "pncp listing fetched");
                SearchResult::ok(format!("PNCP: {} listings", records.len()), records)
            }
            Err(e) => SearchResult::failed(format!("PNCP: {e:#}")),
        }
    }

    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord> {
        static RE_CONTROL: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(\d{14})-\d+-(\d+)/(\d{4})$").unwrap());

        let desc = Self::descriptor();
        let caps = RE_CONTROL
            .captures(identifier.trim())
            .ok_or_else(|| anyhow!("invalid PNCP control number: {identifier}"))?;
        let (cnpj, seq, year) = (&caps[1], &caps[2], &caps[3]);

        let base = desc.detail_url.context("pncp detail endpoint configured")?;
        let url = format!("{base}/{cnpj}/compras/{year}/{}", seq.trim_start_matches('0'));

        let response = send_with_retry(
            self.client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json"),
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        .with_context(|| format!("PNCP detail {identifier}"))?;

        let item: Item = response
            .json()
            .await
            .context("PNCP detail is not the expected JSON shape")?;
        Self::normalize_item(item)
            .ok_or_else(|| anyhow!("PNCP detail {identifier} has no bidding number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BiddingStatus, Modality};

    const BODY: &str = r#"{
        "data": [
            {
                "numeroCompra": "90012",
                "anoCompra": 2025,
                "objetoCompra": "Aquisição de servidores de rede",
                "modalidadeNome": "Pregão - Eletrônico",
                "situacaoCompraNome": "Divulgada no PNCP",
                "valorTotalEstimado": 150000.5,
                "dataAberturaProposta": "2025-02-10T08:00:00",
                "dataPublicacaoPncp": "2025-01-20T12:00:00",
                "numeroControlePNCP": "00394452000103-1-000123/2025"
            },
            { "objetoCompra": "sem número" }
        ],
        "totalRegistros": 2
    }"#;

    #[test]
    fn normalizes_listing_and_drops_numberless() {
        let recs = PncpFetcher::normalize_body(BODY).unwrap();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.bidding_number, "90012/2025");
        assert_eq!(r.modality, Modality::PregaoEletronico);
        assert_eq!(r.status, BiddingStatus::Pending);
        assert_eq!(r.estimated_value, Some(150000.5));
        assert!(r.opening_date.is_some());
        assert_eq!(r.source, "pncp");
    }

    #[test]
    fn missing_data_key_is_shape_error() {
        assert!(PncpFetcher::normalize_body(r#"{"unexpected": true}"#).is_err());
        assert!(PncpFetcher::normalize_body("<html>maintenance</html>").is_err());
    }

    #[test]
    fn zero_results_with_total_is_empty_success() {
        let recs = PncpFetcher::normalize_body(r#"{"totalRegistros": 0}"#).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn money_accepts_number_and_string() {
        use serde_json::json;
        assert_eq!(money_from_value(Some(&json!(10.5))), Some(10.5));
        assert_eq!(money_from_value(Some(&json!("R$ 1.234,56"))), Some(1234.56));
        assert_eq!(money_from_value(Some(&json!(null))), None);
    }
}
