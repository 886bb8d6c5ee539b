// src/segments.rs
//! Keyword-based business-segment classification.
//!
//! A segment is a named set of keywords; a record belongs to a segment when
//! its title or description contains any keyword, case- and
//! accent-insensitively. Keywords are stored accent-folded and lower-case so
//! matching is a plain substring test.

use serde::Serialize;
use tracing::warn;

use crate::normalize::fold_text;

#[derive(Debug, Clone, Serialize)]
pub struct SegmentDescriptor {
    pub key: &'static str,
    pub display_name: &'static str,
    pub keywords: &'static [&'static str],
}

static SEGMENTS: &[SegmentDescriptor] = &[
    SegmentDescriptor {
        key: "saude",
        display_name: "Saúde",
        keywords: &[
            "saude",
            "hospital",
            "medicament",
            "enfermagem",
            "clinic",
            "laborator",
            "odontolog",
            "ambulancia",
            "insumo hospitalar",
        ],
    },
    SegmentDescriptor {
        key: "tecnologia",
        display_name: "Tecnologia da Informação",
        keywords: &[
            "software",
            "servidor",
            "computador",
            "notebook",
            "informatica",
            "licenca de uso",
            "rede de dados",
            "datacenter",
            "impressora",
            "tecnologia da informacao",
        ],
    },
    SegmentDescriptor {
        key: "construcao",
        display_name: "Construção e Engenharia",
        keywords: &[
            "obra",
            "reforma",
            "pavimenta",
            "engenharia",
            "construc",
            "drenagem",
            "edificac",
        ],
    },
    SegmentDescriptor {
        key: "alimentacao",
        display_name: "Alimentação",
        keywords: &[
            "merenda",
            "aliment",
            "genero alimenticio",
            "refeic",
            "hortifruti",
        ],
    },
    SegmentDescriptor {
        key: "servicos_gerais",
        display_name: "Serviços Gerais",
        keywords: &[
            "limpeza",
            "vigilancia",
            "conservacao",
            "jardinagem",
            "portaria",
            "manutencao predial",
        ],
    },
];

pub fn get(key: &str) -> Option<&'static SegmentDescriptor> {
    SEGMENTS.iter().find(|s| s.key == key)
}

pub fn list_all() -> &'static [SegmentDescriptor] {
    SEGMENTS
}

/// True when `text` contains any keyword of the segment.
///
/// An unknown segment key is deliberately permissive: it matches everything,
/// so an aggregated search with a typo'd segment degrades to "unfiltered"
/// instead of erroring. We log it so the typo is visible.
pub fn matches(text: &str, segment_key: &str) -> bool {
    let Some(seg) = get(segment_key) else {
        warn!(segment = segment_key, "unknown segment key, passing record through");
        return true;
    };
    let folded = fold_text(text);
    seg.keywords.iter().any(|kw| folded.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servidor_matches_tecnologia() {
        assert!(matches("Aquisição de SERVIDOR para datacenter", "tecnologia"));
    }

    #[test]
    fn accents_are_folded() {
        assert!(matches("Serviços de manutenção predial", "servicos_gerais"));
        assert!(matches("Gêneros alimentícios para merenda", "alimentacao"));
    }

    #[test]
    fn non_matching_text_is_excluded() {
        assert!(!matches("Aquisição de pneus para frota", "saude"));
    }

    #[test]
    fn unknown_segment_passes_through() {
        assert!(matches("anything at all", "no_such_segment"));
    }
}
