//! Array description files: observing site, filter settings and per-line
//! positions, persisted as XML the way the device configuration always has
//! been.

use std::path::Path;

use roxmltree::{Document, Node};

use crate::utils::DynError;

// Defaults match the hardware's 211 mm filter preset.
pub const DEFAULT_WAVELENGTH_M: f64 = 0.211121449;
pub const DEFAULT_BANDWIDTH_M: f64 = 1199.169832;
pub const DEFAULT_PLOT_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, Default)]
pub struct LineConfig {
    pub position: [f64; 3],
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct ArrayConfig {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub wavelength_m: f64,
    pub bandwidth_m: f64,
    pub plot_size: usize,
    pub lines: Vec<LineConfig>,
}

fn is_tag(node: Node<'_, '_>, tag: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(tag)
}

fn child_text<'a>(node: Node<'a, 'a>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| is_tag(*n, tag))
        .and_then(|n| n.text())
        .map(str::trim)
}

fn parse_f64(node: Node<'_, '_>, tag: &str) -> Result<Option<f64>, DynError> {
    Ok(match child_text(node, tag) {
        Some(v) if !v.is_empty() => Some(v.parse::<f64>()?),
        _ => None,
    })
}

fn parse_required_f64(node: Node<'_, '_>, tag: &str) -> Result<f64, DynError> {
    parse_f64(node, tag)?.ok_or_else(|| format!("missing <{tag}> value").into())
}

fn parse_position(node: Node<'_, '_>) -> Result<[f64; 3], DynError> {
    Ok([
        parse_required_f64(node, "pos-x")?,
        parse_required_f64(node, "pos-y")?,
        parse_required_f64(node, "pos-z")?,
    ])
}

fn parse_bool(node: Node<'_, '_>, tag: &str) -> bool {
    matches!(
        child_text(node, tag),
        Some("true") | Some("1") | Some("yes") | Some("on")
    )
}

pub fn parse_array_config(xml: &str) -> Result<ArrayConfig, DynError> {
    let doc = Document::parse(xml)?;

    let site = doc
        .descendants()
        .find(|n| is_tag(*n, "site"))
        .ok_or("site node not found in array description")?;
    let latitude_deg = parse_required_f64(site, "latitude")?;
    let longitude_deg = parse_required_f64(site, "longitude")?;

    let settings = doc.descendants().find(|n| is_tag(*n, "settings"));
    let wavelength_m = settings
        .map(|n| parse_f64(n, "wavelength"))
        .transpose()?
        .flatten()
        .unwrap_or(DEFAULT_WAVELENGTH_M);
    let bandwidth_m = settings
        .map(|n| parse_f64(n, "bandwidth"))
        .transpose()?
        .flatten()
        .unwrap_or(DEFAULT_BANDWIDTH_M);
    let plot_size = settings
        .map(|n| parse_f64(n, "plot-size"))
        .transpose()?
        .flatten()
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_PLOT_SIZE);

    // Lines keyed 1-based; sort by key so file order does not matter.
    let mut keyed: Vec<(usize, LineConfig)> = Vec::new();
    for node in doc.descendants().filter(|n| is_tag(*n, "line")) {
        let key: usize = node
            .attribute("key")
            .ok_or("line node without key attribute")?
            .trim()
            .parse()?;
        keyed.push((
            key,
            LineConfig {
                position: parse_position(node)?,
                enabled: parse_bool(node, "enabled"),
            },
        ));
    }
    if keyed.is_empty() {
        return Err("array description contains no line nodes".into());
    }
    keyed.sort_by_key(|(key, _)| *key);
    let lines = keyed.into_iter().map(|(_, line)| line).collect();

    Ok(ArrayConfig {
        latitude_deg,
        longitude_deg,
        wavelength_m,
        bandwidth_m,
        plot_size,
        lines,
    })
}

pub fn load_array_config(path: &Path) -> Result<ArrayConfig, DynError> {
    let xml = std::fs::read_to_string(path)?;
    parse_array_config(&xml)
}
