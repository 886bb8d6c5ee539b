// src/fetch/licitacoes_e.rs
//! Scraping fetcher for the Licitações-e portal (Banco do Brasil).
//!
//! Marked fragile: there is no API, so we POST the public search form and
//! slice the results table out of the HTML. Zero matched rows is ambiguous
//! between "legitimately empty" and "layout changed"; the portal prints a
//! known marker when a search finds nothing, and we only report an empty
//! success when that marker is present.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::fetch::html::{cell_texts, first_href, next_tag_block_ci, slice_between_ci};
use crate::fetch::{send_with_retry, SourceFetcher};
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use crate::normalize::{
    clean_bidding_number, fold_text, map_modality, map_status, parse_currency, parse_datetime,
    to_query_date, QueryDateFormat,
};
use crate::sources;

/// Results container; the portal has kept this class through redesigns.
const TABLE_OPEN: &str = "<table class=\"tabela-resultado";
/// Printed verbatim when a search legitimately finds nothing.
const NO_RESULTS_MARKER: &str = "nenhuma licitacao encontrada";

pub struct LicitacoesEFetcher {
    client: Client,
    config: AppConfig,
}

impl LicitacoesEFetcher {
    pub fn new(client: Client, config: AppConfig) -> Self {
        Self { client, config }
    }

    fn descriptor() -> &'static sources::SourceDescriptor {
        sources::get("licitacoes_e").expect("licitacoes_e descriptor registered")
    }

    /// Row layout: numero | objeto | modalidade | situacao | abertura | valor.
    fn normalize_row(cells: &[String], link: Option<String>) -> Option<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let mut rec = NormalizedBiddingRecord::for_source(desc.key, desc.display_name);

        rec.bidding_number = clean_bidding_number(desc.key, cells.first()?);
        if rec.bidding_number.is_empty() {
            warn!(source = desc.key, "row without bidding number dropped");
            return None;
        }
        rec.title = cells.get(1).cloned().unwrap_or_default();
        rec.description = rec.title.clone();
        rec.modality = map_modality(cells.get(2).map(String::as_str).unwrap_or(""));
        rec.status = map_status(cells.get(3).map(String::as_str).unwrap_or(""));
        rec.opening_date = cells.get(4).and_then(|c| parse_datetime(c));
        rec.estimated_value = cells.get(5).and_then(|c| parse_currency(c));
        rec.url_source = link.map(|href| {
            if href.starts_with("http") {
                href
            } else {
                format!("https://www.licitacoes-e.com.br{href}")
            }
        });
        Some(rec)
    }

    fn parse_page(body: &str) -> Result<Vec<NormalizedBiddingRecord>> {
        let Some(table) = slice_between_ci(body, TABLE_OPEN, "</table>") else {
            if fold_text(body).contains(NO_RESULTS_MARKER) {
                return Ok(Vec::new());
            }
            return Err(anyhow!(
                "results table not found and no empty-result marker; portal layout changed?"
            ));
        };

        let mut records = Vec::new();
        let mut pos = 0;
        while let Some((start, end)) = next_tag_block_ci(table, "<tr", "</tr>", pos) {
            let row = &table[start..end];
            pos = end;
            let cells = cell_texts(row);
            // Header rows have <th> cells only.
            if cells.is_empty() {
                continue;
            }
            if let Some(rec) = Self::normalize_row(&cells, first_href(row)) {
                records.push(rec);
            }
        }

        if records.is_empty() && !fold_text(body).contains(NO_RESULTS_MARKER) {
            return Err(anyhow!(
                "results table present but no parseable rows; portal layout changed?"
            ));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceFetcher for LicitacoesEFetcher {
    fn key(&self) -> &'static str {
        "licitacoes_e"
    }

    async fn fetch(&self, filters: &SearchFilters) -> SearchResult {
        let desc = Self::descriptor();

        let mut form: Vec<(&str, String)> = vec![("opcao", "pesquisar".to_string())];
        if let Some(n) = &filters.bidding_number {
            form.push(("numeroLicitacao", n.trim().to_string()));
        }
        if let Some(start) = &filters.start_date {
            form.push(("dataInicio", to_query_date(start, QueryDateFormat::BrSlash)));
        }
        if let Some(end) = &filters.end_date {
            form.push(("dataFim", to_query_date(end, QueryDateFormat::BrSlash)));
        }
        if let Some(page) = filters.page {
            form.push(("pagina", page.to_string()));
        }

        let request = self
            .client
            .post(desc.listing_url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .header(reqwest::header::ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9")
            .form(&form);

        let response = match send_with_retry(
            request,
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return SearchResult::failed(format!("Licitações-e request failed: {e:#}")),
        };

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return SearchResult::failed(format!("Licitações-e body read failed: {e}")),
        };

        match Self::parse_page(&body) {
            Ok(records) => {
                debug!(count = records.len(), "licitacoes_e page scraped");
                SearchResult::ok(format!("Licitações-e: {} listings", records.len()), records)
            }
            Err(e) => SearchResult::failed(format!("Licitações-e: {e:#}")),
        }
    }

    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord> {
        let desc = Self::descriptor();
        let base = desc
            .detail_url
            .context("licitacoes_e detail endpoint configured")?;

        let response = send_with_retry(
            self.client
                .get(base)
                .query(&[("numeroLicitacao", identifier.trim())])
                .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
                .header(reqwest::header::ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9"),
            self.config.retry_attempts,
            self.config.retry_backoff,
        )
        .await
        .with_context(|| format!("Licitações-e detail {identifier}"))?;

        let body = response.text().await.context("Licitações-e detail body")?;
        let records = Self::parse_page(&body)?;
        records
            .into_iter()
            .find(|r| r.bidding_number.contains(identifier.trim()))
            .ok_or_else(|| anyhow!("Licitações-e detail {identifier} not found in page"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BiddingStatus, Modality};

    const PAGE: &str = r#"
        <html><body>
        <table class="tabela-resultado listagem">
          <tr><th>N&uacute;mero</th><th>Objeto</th><th>Modalidade</th><th>Situa&ccedil;&atilde;o</th><th>Abertura</th><th>Valor</th></tr>
          <tr>
            <td>1023948 - 45/2025</td>
            <td><a href="/aop/consultar-detalhes-licitacao.aop?id=1023948">Reforma de unidade b&aacute;sica de sa&uacute;de</a></td>
            <td>Preg&atilde;o Eletr&ocirc;nico</td>
            <td>Aberto p/ Lances</td>
            <td>05/03/2025 10:00</td>
            <td>R$ 1.234,56</td>
          </tr>
        </table>
        </body></html>"#;

    const EMPTY_PAGE: &str =
        "<html><body><p>Nenhuma licita\u{e7}\u{e3}o encontrada para os filtros.</p></body></html>";

    #[test]
    fn parses_result_rows() {
        let recs = LicitacoesEFetcher::parse_page(PAGE).unwrap();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.bidding_number, "45/2025");
        assert_eq!(r.title, "Reforma de unidade básica de saúde");
        assert_eq!(r.modality, Modality::PregaoEletronico);
        assert_eq!(r.status, BiddingStatus::Active);
        assert_eq!(r.estimated_value, Some(1234.56));
        assert!(r
            .url_source
            .as_deref()
            .unwrap()
            .starts_with("https://www.licitacoes-e.com.br/aop/"));
    }

    #[test]
    fn empty_marker_is_legitimate_empty() {
        let recs = LicitacoesEFetcher::parse_page(EMPTY_PAGE).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn missing_table_without_marker_is_failure() {
        let err = LicitacoesEFetcher::parse_page("<html><body>timeout page</body></html>");
        assert!(err.is_err());
    }
}
