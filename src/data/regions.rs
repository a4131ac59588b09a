//! IBGE municipality code → display name.
//!
//! Only a small built-in table is shipped (state capitals, large cities and the
//! Espírito Santo municipalities most present in registry extracts). Anything
//! else renders as `Municipality <code>`; non-IBGE identifiers render verbatim.

use crate::domain::RegionCode;

/// (IBGE code, municipality name). Sorted by code for binary search.
const MUNICIPALITIES: &[(u32, &str)] = &[
    (1100205, "Porto Velho"),
    (1200401, "Rio Branco"),
    (1302603, "Manaus"),
    (1400100, "Boa Vista"),
    (1501402, "Belém"),
    (1600303, "Macapá"),
    (1721000, "Palmas"),
    (2111300, "São Luís"),
    (2211001, "Teresina"),
    (2304400, "Fortaleza"),
    (2310308, "Juazeiro do Norte"),
    (2312908, "Sobral"),
    (2403251, "Mossoró"),
    (2408102, "Natal"),
    (2507507, "João Pessoa"),
    (2611606, "Recife"),
    (2704302, "Maceió"),
    (2800308, "Aracaju"),
    (2927408, "Salvador"),
    (3106200, "Belo Horizonte"),
    (3200607, "Aracruz"),
    (3201209, "Cachoeiro de Itapemirim"),
    (3201308, "Cariacica"),
    (3201506, "Colatina"),
    (3202405, "Guarapari"),
    (3203205, "Linhares"),
    (3204906, "São Mateus"),
    (3205002, "Serra"),
    (3205101, "Viana"),
    (3205200, "Vila Velha"),
    (3205309, "Vitória"),
    (3304557, "Rio de Janeiro"),
    (3509502, "Campinas"),
    (3518800, "Guarulhos"),
    (3550308, "São Paulo"),
    (4106902, "Curitiba"),
    (4205407, "Florianópolis"),
    (4314902, "Porto Alegre"),
    (5002704, "Campo Grande"),
    (5103403, "Cuiabá"),
    (5208707, "Goiânia"),
    (5300108, "Brasília"),
];

/// IBGE state prefix (first two digits) → UF abbreviation.
const STATES: &[(u32, &str)] = &[
    (11, "RO"),
    (12, "AC"),
    (13, "AM"),
    (14, "RR"),
    (15, "PA"),
    (16, "AP"),
    (17, "TO"),
    (21, "MA"),
    (22, "PI"),
    (23, "CE"),
    (24, "RN"),
    (25, "PB"),
    (26, "PE"),
    (27, "AL"),
    (28, "SE"),
    (29, "BA"),
    (31, "MG"),
    (32, "ES"),
    (33, "RJ"),
    (35, "SP"),
    (41, "PR"),
    (42, "SC"),
    (43, "RS"),
    (50, "MS"),
    (51, "MT"),
    (52, "GO"),
    (53, "DF"),
];

/// Numeric IBGE code, if `code` looks like one (6 or 7 digits).
fn ibge_number(code: &RegionCode) -> Option<u32> {
    let s = code.as_str();
    if !(6..=7).contains(&s.len()) || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// UF of an IBGE code, from its state prefix.
pub fn state_abbreviation(code: &RegionCode) -> Option<&'static str> {
    let n = ibge_number(code)?;
    let prefix = if code.as_str().len() == 7 { n / 100_000 } else { n / 10_000 };
    STATES
        .binary_search_by_key(&prefix, |&(p, _)| p)
        .ok()
        .map(|i| STATES[i].1)
}

/// Municipality name from the built-in table (no UF suffix).
pub fn municipality_name(code: &RegionCode) -> Option<&'static str> {
    let n = ibge_number(code)?;
    // 6-digit codes omit the IBGE check digit; compare on the first six digits.
    let found = if code.as_str().len() == 7 {
        MUNICIPALITIES.binary_search_by_key(&n, |&(c, _)| c).ok()
    } else {
        MUNICIPALITIES.iter().position(|&(c, _)| c / 10 == n)
    };
    found.map(|i| MUNICIPALITIES[i].1)
}

/// Display label for a region: `Name/UF` when known, otherwise a placeholder.
pub fn region_name(code: &RegionCode) -> String {
    match (municipality_name(code), state_abbreviation(code)) {
        (Some(name), Some(uf)) => format!("{name}/{uf}"),
        (Some(name), None) => name.to_string(),
        (None, _) if ibge_number(code).is_some() => format!("Municipality {code}"),
        (None, _) => code.to_string(),
    }
}
