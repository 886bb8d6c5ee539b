// src/sources.rs
//! Static registry of external procurement sources.
//!
//! The registry is a compile-time table: no mutation API, one descriptor per
//! fetcher implementation. Operability `status` gates two independent
//! behaviors: inclusion when the caller asks for `all` sources, and whether
//! the aggregator will dispatch a fetch even when the source is explicitly
//! named.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Api,
    Scraping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Experimental,
    Fragile,
    VeryFragile,
    RequiresCaptcha,
    Disabled,
}

impl SourceStatus {
    /// Hard-blocked: never dispatched, not even on explicit request.
    pub fn is_blocked(self) -> bool {
        matches!(self, SourceStatus::Disabled | SourceStatus::RequiresCaptcha)
    }

    /// Soft-gated: dispatched only when the caller allows fragile sources.
    pub fn is_fragile(self) -> bool {
        matches!(
            self,
            SourceStatus::Experimental | SourceStatus::Fragile | SourceStatus::VeryFragile
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDescriptor {
    pub key: &'static str,
    pub display_name: &'static str,
    pub kind: IntegrationKind,
    pub status: SourceStatus,
    pub listing_url: &'static str,
    pub detail_url: Option<&'static str>,
    /// Host substrings used to recover the source of a stored record from
    /// its URL when the record carries no explicit source tag.
    pub hosts: &'static [&'static str],
}

static SOURCES: &[SourceDescriptor] = &[
    SourceDescriptor {
        key: "pncp",
        display_name: "Portal Nacional de Contratações Públicas",
        kind: IntegrationKind::Api,
        status: SourceStatus::Active,
        listing_url: "https://pncp.gov.br/api/consulta/v1/contratacoes/publicacao",
        detail_url: Some("https://pncp.gov.br/api/consulta/v1/orgaos"),
        hosts: &["pncp.gov.br"],
    },
    SourceDescriptor {
        key: "comprasnet",
        display_name: "Compras.gov.br",
        kind: IntegrationKind::Api,
        status: SourceStatus::Active,
        listing_url: "https://compras.dados.gov.br/licitacoes/v1/licitacoes.json",
        detail_url: Some("https://compras.dados.gov.br/licitacoes/id/licitacao"),
        hosts: &["compras.dados.gov.br", "comprasnet.gov.br", "compras.gov.br"],
    },
    SourceDescriptor {
        key: "portal_transparencia",
        display_name: "Portal da Transparência",
        kind: IntegrationKind::Api,
        status: SourceStatus::Experimental,
        listing_url: "https://api.portaldatransparencia.gov.br/api-de-dados/licitacoes",
        detail_url: Some("https://api.portaldatransparencia.gov.br/api-de-dados/licitacoes"),
        hosts: &["portaldatransparencia.gov.br"],
    },
    SourceDescriptor {
        key: "licitacoes_e",
        display_name: "Licitações-e (Banco do Brasil)",
        kind: IntegrationKind::Scraping,
        status: SourceStatus::Fragile,
        listing_url: "https://www.licitacoes-e.com.br/aop/pesquisar-licitacao.aop",
        detail_url: Some("https://www.licitacoes-e.com.br/aop/consultar-detalhes-licitacao.aop"),
        hosts: &["licitacoes-e.com.br"],
    },
    // Registered for completeness; the portal sits behind a CAPTCHA wall and
    // is never dispatched.
    SourceDescriptor {
        key: "bec_sp",
        display_name: "Bolsa Eletrônica de Compras SP",
        kind: IntegrationKind::Scraping,
        status: SourceStatus::RequiresCaptcha,
        listing_url: "https://www.bec.sp.gov.br/BEC_Pregao_UI/OC/pregao_oc.aspx",
        detail_url: None,
        hosts: &["bec.sp.gov.br"],
    },
    SourceDescriptor {
        key: "e_negocios",
        display_name: "e-Negócios Públicos",
        kind: IntegrationKind::Scraping,
        status: SourceStatus::Disabled,
        listing_url: "https://www.enegociospublicos.com.br/seguro/negocio/lista",
        detail_url: None,
        hosts: &["enegociospublicos.com.br"],
    },
];

pub fn get(key: &str) -> Option<&'static SourceDescriptor> {
    SOURCES.iter().find(|s| s.key == key)
}

pub fn list_all() -> &'static [SourceDescriptor] {
    SOURCES
}

/// Recover a source from a stored record's URL by host substring.
/// Hard-blocked sources are never selected this way.
pub fn detect_from_url(url: &str) -> Option<&'static SourceDescriptor> {
    let lower = url.to_ascii_lowercase();
    SOURCES
        .iter()
        .find(|s| !s.status.is_blocked() && s.hosts.iter().any(|h| lower.contains(h)))
}
