// src/fetch/portal_transparencia.rs
//! Fetcher for the Portal da Transparência open-data API.
//!
//! Experimental: the API needs a registered key (`chave-api-dados` header)
//! and only covers federal executive-branch biddings. The listing body is a
//! bare JSON array; anything else is a contract change.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
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

const API_KEY_HEADER: &str = "chave-api-dados";

#[derive(Debug, Deserialize)]
struct Item {
    id: Option<i64>,
    licitacao: Option<Inner>,
    #[serde(rename = "dataAbertura")]
    data_abertura: Option<String>,
    #[serde(rename = "dataPublicacao")]
    data_publicacao: Option<String>,
    situacao: Option<String>,
    modalidade: Option<Named>,
    valor: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Inner {
    numero: Option<String>,
    objeto: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    descricao: Option<String>,
}

pub struct TransparenciaFetcher {
    client: Client,
    config: AppConfig,
}

impl TransparenciaFetcher {
    pub fn new(client: Client, config: AppConfig) -> Self {
        Self { client, config }
    }

    fn descriptor() -> &'static sources::SourceDescriptor {
        sources::get("portal_transparencia").expect("portal_transparencia descriptor registered")
    }

    fn normalize_item(item: Item) -> Option<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let mut rec = NormalizedBiddingRecord::for_source(desc.key, desc.display_name);

        let raw_number = item
            .licitacao
            .as_ref()
            .and_then(|l| l.numero.clone())
            .or_else(|| item.id.map(|i| i.to_string()))
            .unwrap_or_default();
        rec.bidding_number = clean_bidding_number(desc.key, &raw_number);
        if rec.bidding_number.is_empty() {
            warn!(source = desc.key, "item without bidding number dropped");
            return None;
        }

        let objeto = item
            .licitacao
            .as_ref()
            .and_then(|l| l.objeto.clone())
            .unwrap_or_default();
        rec.title = objeto.clone();
        rec.description = objeto;
        rec.modality = map_modality(
            item.modalidade
                .as_ref()
                .and_then(|m| m.descricao.as_deref())
                .unwrap_or(""),
        );
        rec.status = map_status(item.situacao.as_deref().unwrap_or(""));
        rec.estimated_value = match &item.valor {
            Some(serde_json::Value::Number(n)) => n.as_f64().filter(|x| *x >= 0.0),
            Some(serde_json::Value::String(s)) => parse_currency(s),
            _ => None,
        };
        rec.opening_date = item.data_abertura.as_deref().and_then(parse_datetime);
        rec.publication_date = item.data_publicacao.as_deref().and_then(parse_datetime);
        rec.url_source = item
            .id
            .map(|i| format!("https://portaldatransparencia.gov.br/licitacoes/{i}"));
        Some(rec)
    }

    fn normalize_body(body: &str) -> Result<Vec<NormalizedBiddingRecord>> {
        let items: Vec<Item> = serde_json::from_str(body)
            .context("Portal da Transparência response is not a JSON array")?;
        Ok(items.into_iter().filter_map(Self::normalize_item).collect())
    }
}

#[async_trait]
impl SourceFetcher for TransparenciaFetcher {
    fn key(&self) -> &'static str {
        "portal_transparencia"
    }

    async fn fetch(&self, filters: &SearchFilters) -> SearchResult {
        let Some(api_key) = &self.config.transparencia_api_key else {
            return SearchResult::failed(
                "Portal da Transparência skipped: TRANSPARENCIA_API_KEY not configured",
            );
        };

        let desc = Self::descriptor();
        let end = filters.end_date.unwrap_or_else(Utc::now);
        let start = filters.start_date.unwrap_or(end - Duration::days(30));

        let request = self
            .client
            .get(desc.listing_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(API_KEY_HEADER, api_key)
            .query(&[
                ("dataInicial", to_query_date(&start, QueryDateFormat::BrSlash)),
                ("dataFinal", to_query_date(&end, QueryDateFormat::BrSlash)),
                ("pagina", filters.page.unwrap_or(1).to_string()),
            ]);

        let response = match send_with_retry(
            request,
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                return SearchResult::failed(format!(
                    "Portal da Transparência request failed: {e:#}"
                ))
            }
        };

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return SearchResult::failed(format!(
                    "Portal da Transparência body read failed: {e}"
                ))
            }
        };

        match Self::normalize_body(&body) {
            Ok(mut records) => {
                if let Some(number) = &filters.bidding_number {
                    records.retain(|r| r.bidding_number.contains(number.trim()));
                }
                debug!(count = records.len(), "portal_transparencia listing fetched");
                SearchResult::ok(
                    format!("Portal da Transparência: {} listings", records.len()),
                    records,
                )
            }
            Err(e) => SearchResult::failed(format!("Portal da Transparência: {e:#}")),
        }
    }

    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord> {
        let api_key = self
            .config
            .transparencia_api_key
            .as_ref()
            .context("TRANSPARENCIA_API_KEY not configured")?;

        let desc = Self::descriptor();
        let base = desc
            .detail_url
            .context("portal_transparencia detail endpoint configured")?;
        let url = format!("{base}/{}", identifier.trim());

        let response = send_with_retry(
            self.client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .header(API_KEY_HEADER, api_key),
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        .with_context(|| format!("Portal da Transparência detail {identifier}"))?;

        let item: Item = response
            .json()
            .await
            .context("Portal da Transparência detail is not the expected JSON shape")?;
        Self::normalize_item(item).ok_or_else(|| {
            anyhow!("Portal da Transparência detail {identifier} has no bidding number")
        })
    }
}
