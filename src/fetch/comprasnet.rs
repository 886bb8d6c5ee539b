// src/fetch/comprasnet.rs
//! Fetcher for the federal open-data purchasing API (compras.dados.gov.br).
//!
//! HAL-flavored JSON: listings live under `_embedded.licitacoes`. A missing
//! `_embedded` with `count: 0` is a legitimate empty page; a body with
//! neither is treated as a contract change.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::fetch::{send_with_retry, SourceFetcher};
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use crate::normalize::{
    clean_bidding_number, map_modality, map_status, parse_currency, parse_datetime, to_query_date,
    QueryDateFormat,
};
use crate::sources;

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    licitacoes: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    identificador: Option<String>,
    numero_aviso: Option<i64>,
    objeto: Option<String>,
    modalidade_descricao: Option<String>,
    situacao_aviso: Option<String>,
    valor_estimado: Option<serde_json::Value>,
    data_abertura_proposta: Option<String>,
    data_entrega_proposta: Option<String>,
    data_publicacao: Option<String>,
    #[serde(rename = "_links")]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(rename = "self")]
    this: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: Option<String>,
}

pub struct ComprasnetFetcher {
    client: Client,
    config: AppConfig,
}

impl ComprasnetFetcher {
    pub fn new(client: Client, config: AppConfig) -> Self {
        Self { client, config }
    }

    fn descriptor() -> &'static sources::SourceDescriptor {
        sources::get("comprasnet").expect("comprasnet descriptor registered")
    }

    fn normalize_item(item: Item) -> Option<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let mut rec = NormalizedBiddingRecord::for_source(desc.key, desc.display_name);

        let year = item
            .data_publicacao
            .as_deref()
            .and_then(parse_datetime)
            .map(|d| d.format("%Y").to_string());
        let raw_number = match (item.numero_aviso, year) {
            (Some(n), Some(y)) => format!("{n}/{y}"),
            (Some(n), None) => n.to_string(),
            (None, _) => item.identificador.clone().unwrap_or_default(),
        };
        rec.bidding_number = clean_bidding_number(desc.key, &raw_number);
        if rec.bidding_number.is_empty() {
            warn!(source = desc.key, "item without bidding number dropped");
            return None;
        }

        rec.title = item.objeto.clone().unwrap_or_default();
        rec.description = item.objeto.unwrap_or_default();
        rec.modality = map_modality(item.modalidade_descricao.as_deref().unwrap_or(""));
        rec.status = map_status(item.situacao_aviso.as_deref().unwrap_or(""));
        rec.estimated_value = match &item.valor_estimado {
            Some(serde_json::Value::Number(n)) => n.as_f64().filter(|x| *x >= 0.0),
            Some(serde_json::Value::String(s)) => parse_currency(s),
            _ => None,
        };
        rec.opening_date = item.data_abertura_proposta.as_deref().and_then(parse_datetime);
        rec.closing_date = item.data_entrega_proposta.as_deref().and_then(parse_datetime);
        rec.publication_date = item.data_publicacao.as_deref().and_then(parse_datetime);
        rec.url_source = item
            .links
            .and_then(|l| l.this)
            .and_then(|h| h.href)
            .map(|h| {
                if h.starts_with("http") {
                    h
                } else {
                    format!("https://compras.dados.gov.br{h}")
                }
            });
        Some(rec)
    }

    fn normalize_body(body: &str) -> Result<Vec<NormalizedBiddingRecord>> {
        let listing: Listing = serde_json::from_str(body)
            .context("compras.gov.br response is not the expected JSON shape")?;
        let items = match listing.embedded {
            Some(e) => e.licitacoes,
            None if listing.count == Some(0) => Vec::new(),
            None => {
                return Err(anyhow!(
                    "compras.gov.br response has neither '_embedded' nor a zero count"
                ))
            }
        };
        Ok(items.into_iter().filter_map(Self::normalize_item).collect())
    }
}

#[async_trait]
impl SourceFetcher for ComprasnetFetcher {
    fn key(&self) -> &'static str {
        "comprasnet"
    }

    async fn fetch(&self, filters: &SearchFilters) -> SearchResult {
        let desc = Self::descriptor();

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(start) = &filters.start_date {
            query.push((
                "data_abertura_proposta_min",
                to_query_date(start, QueryDateFormat::IsoDate),
            ));
        }
        if let Some(end) = &filters.end_date {
            query.push((
                "data_abertura_proposta_max",
                to_query_date(end, QueryDateFormat::IsoDate),
            ));
        }
        if let Some(page) = filters.page {
            // The API paginates by record offset.
            query.push(("offset", ((page.saturating_sub(1)) * 500).to_string()));
        }

        let request = self
            .client
            .get(desc.listing_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query);

        let response = match send_with_retry(
            request,
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return SearchResult::failed(format!("compras.gov.br request failed: {e:#}")),
        };

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return SearchResult::failed(format!("compras.gov.br body read failed: {e}")),
        };

        match Self::normalize_body(&body) {
            Ok(mut records) => {
                if let Some(number) = &filters.bidding_number {
                    records.retain(|r| r.bidding_number.contains(number.trim()));
                }
                debug!(count = records.len(), "comprasnet listing fetched");
                SearchResult::ok(
                    format!("Compras.gov.br: {} listings", records.len()),
                    records,
                )
            }
            Err(e) => SearchResult::failed(format!("Compras.gov.br: {e:#}")),
        }
    }

    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let base = desc.detail_url.context("comprasnet detail endpoint configured")?;
        let url = format!("{base}/{}.json", identifier.trim());

        let response = send_with_retry(
            self.client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json"),
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        .with_context(|| format!("compras.gov.br detail {identifier}"))?;

        let item: Item = response
            .json()
            .await
            .context("compras.gov.br detail is not the expected JSON shape")?;
        Self::normalize_item(item)
            .ok_or_else(|| anyhow!("compras.gov.br detail {identifier} has no bidding number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BiddingStatus, Modality};

    const BODY: &str = r#"{
        "_embedded": {
            "licitacoes": [
                {
                    "identificador": "00601520000452025",
                    "numero_aviso": 52,
                    "objeto": "Contratação de serviços de limpeza hospitalar",
                    "modalidade_descricao": "Pregão Eletrônico",
                    "situacao_aviso": "Publicado",
                    "valor_estimado": "250.000,00",
                    "data_abertura_proposta": "2025-04-02T09:00:00",
                    "data_publicacao": "2025-03-15",
                    "_links": { "self": { "href": "/licitacoes/id/licitacao/00601520000452025" } }
                }
            ]
        },
        "count": 1
    }"#;

    #[test]
    fn normalizes_hal_listing() {
        let recs = ComprasnetFetcher::normalize_body(BODY).unwrap();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.bidding_number, "52/2025");
        assert_eq!(r.modality, Modality::PregaoEletronico);
        assert_eq!(r.status, BiddingStatus::Pending);
        assert_eq!(r.estimated_value, Some(250000.0));
        assert_eq!(
            r.url_source.as_deref(),
            Some("https://compras.dados.gov.br/licitacoes/id/licitacao/00601520000452025")
        );
    }

    #[test]
    fn zero_count_without_embedded_is_empty() {
        let recs = ComprasnetFetcher::normalize_body(r#"{"count": 0}"#).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn unexpected_shape_is_error() {
        assert!(ComprasnetFetcher::normalize_body(r#"{"foo": 1}"#).is_err());
        assert!(ComprasnetFetcher::normalize_body("not json").is_err());
    }
}
