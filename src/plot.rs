//! SVG figures for a finished run.

use anyhow::Result;
use log::{debug, info};
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    hmo::ClusterPresence,
    report::ReportRow,
    utils::{partial_path, publish},
};

pub const MAX_LABEL_LEN: usize = 40;
const UNCLASSIFIED_COLOR: &str = "#bdbdbd";
const FONT: &str = "font-family=\"Helvetica,Arial,sans-serif\"";

/// Cuts strain labels after 40 characters and appends `...`.
pub fn truncate_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_LEN {
        label.to_string()
    } else {
        let kept: String = label.chars().take(MAX_LABEL_LEN).collect();
        format!("{}...", kept)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// White to dark blue ramp for values in [0, 1].
fn heat_color(value: f64) -> String {
    let v = value.clamp(0.0, 1.0);
    let r = (255.0 - v * (255.0 - 8.0)).round() as u8;
    let g = (255.0 - v * (255.0 - 48.0)).round() as u8;
    let b = (255.0 - v * (255.0 - 107.0)).round() as u8;
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

struct Svg {
    width: f64,
    height: f64,
    body: String,
}

impl Svg {
    fn new(width: f64, height: f64) -> Self {
        Svg {
            width,
            height,
            body: String::new(),
        }
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        let _ = writeln!(
            self.body,
            "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"{}\" stroke=\"#ffffff\" stroke-width=\"0.5\"/>",
            x, y, w, h, escape(fill)
        );
    }

    fn text(&mut self, x: f64, y: f64, size: f64, anchor: &str, content: &str) {
        let _ = writeln!(
            self.body,
            "<text x=\"{:.2}\" y=\"{:.2}\" font-size=\"{}\" text-anchor=\"{}\" {}>{}</text>",
            x, y, size, anchor, FONT, escape(content)
        );
    }

    /// Text rotated -90 degrees around its anchor point.
    fn vertical_text(&mut self, x: f64, y: f64, size: f64, content: &str) {
        let _ = writeln!(
            self.body,
            "<text x=\"{:.2}\" y=\"{:.2}\" font-size=\"{}\" text-anchor=\"end\" transform=\"rotate(-90 {:.2} {:.2})\" {}>{}</text>",
            x, y, size, x, y, FONT, escape(content)
        );
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        let _ = writeln!(
            self.body,
            "<line x1=\"{:.2}\" y1=\"{:.2}\" x2=\"{:.2}\" y2=\"{:.2}\" stroke=\"#333333\" stroke-width=\"1\"/>",
            x1, y1, x2, y2
        );
    }

    fn render(&self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w:.0}\" height=\"{h:.0}\" viewBox=\"0 0 {w:.0} {h:.0}\">\n<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n{}</svg>\n",
            self.body,
            w = self.width,
            h = self.height
        )
    }

    fn save(&self, path: &Path) -> Result<()> {
        let partial = partial_path(path);
        fs::write(&partial, self.render())?;
        publish(&partial, path)?;
        debug!("Saved plot {:?}", path);
        Ok(())
    }
}

/// Detected genomes ordered by descending summed abundance.
fn genomes_by_abundance(rows: &[ReportRow]) -> Vec<(String, String, String)> {
    let mut totals: BTreeMap<&str, (f64, &ReportRow)> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row.genome_file.as_str()).or_insert((0.0, row));
        entry.0 += row.taxonomic_abundance;
    }
    let mut genomes: Vec<(f64, String, String, String)> = totals
        .into_iter()
        .filter(|(_, (total, _))| *total > 0.0)
        .map(|(genome, (total, row))| {
            (
                total,
                genome.to_string(),
                truncate_label(row.display_label()),
                row.color
                    .clone()
                    .unwrap_or_else(|| crate::annotation::genome_color(genome)),
            )
        })
        .collect();
    genomes.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    genomes.into_iter().map(|(_, g, l, c)| (g, l, c)).collect()
}

fn sample_names(rows: &[ReportRow]) -> Vec<String> {
    let mut names: Vec<String> = rows.iter().map(|r| r.sample.clone()).collect();
    names.sort();
    names.dedup();
    names
}

/// Stacked bar chart of relative abundance, one bar per sample. The part not
/// attributed to any genome is drawn as "unclassified".
pub fn abundance_barplot(rows: &[ReportRow], path: &Path) -> Result<()> {
    let samples = sample_names(rows);
    let genomes = genomes_by_abundance(rows);

    let bar_w = 36.0;
    let gap = 14.0;
    let (left, top, plot_h): (f64, f64, f64) = (60.0, 30.0, 300.0);
    let legend_x = left + samples.len() as f64 * (bar_w + gap) + 30.0;
    let width = legend_x + 320.0;
    let height = (top + plot_h + 140.0).max(top + 20.0 * (genomes.len() + 2) as f64);
    let mut svg = Svg::new(width, height);

    svg.text(left, 18.0, 14.0, "start", "Relative abundance");
    svg.line(left - 5.0, top, left - 5.0, top + plot_h);
    for tick in [0.0, 25.0, 50.0, 75.0, 100.0] {
        let y = top + plot_h - tick / 100.0 * plot_h;
        svg.text(left - 10.0, y + 4.0, 10.0, "end", &format!("{:.0}", tick));
    }

    let mut lookup: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    for row in rows {
        lookup.insert(
            (row.sample.as_str(), row.genome_file.as_str()),
            row.taxonomic_abundance,
        );
    }

    for (i, sample) in samples.iter().enumerate() {
        let x = left + i as f64 * (bar_w + gap);
        let mut y = top + plot_h;
        let mut used: f64 = 0.0;
        for (genome, _, color) in &genomes {
            let value = lookup
                .get(&(sample.as_str(), genome.as_str()))
                .copied()
                .unwrap_or(0.0);
            if value <= 0.0 {
                continue;
            }
            let h = value / 100.0 * plot_h;
            y -= h;
            svg.rect(x, y, bar_w, h, color);
            used += value;
        }
        let rest = (100.0 - used).max(0.0);
        if rest > 0.0 {
            let h = rest / 100.0 * plot_h;
            svg.rect(x, y - h, bar_w, h, UNCLASSIFIED_COLOR);
        }
        svg.vertical_text(x + bar_w / 2.0, top + plot_h + 8.0, 10.0, sample);
    }

    for (i, (_, label, color)) in genomes
        .iter()
        .map(|(g, l, c)| (g.as_str(), l.as_str(), c.as_str()))
        .chain(std::iter::once(("", "unclassified", UNCLASSIFIED_COLOR)))
        .enumerate()
    {
        let y = top + i as f64 * 20.0;
        svg.rect(legend_x, y, 12.0, 12.0, color);
        svg.text(legend_x + 18.0, y + 10.0, 10.0, "start", label);
    }

    svg.save(path)
}

/// Genome by sample grid coloured by `value` scaled to [0, 1] by `scale`.
fn heatmap<F>(
    rows: &[ReportRow],
    path: &Path,
    title: &str,
    value: F,
    scale: f64,
    label_fmt: fn(f64) -> String,
) -> Result<()>
where
    F: Fn(&ReportRow) -> f64,
{
    let samples = sample_names(rows);
    let mut genomes: BTreeMap<&str, (String, f64)> = BTreeMap::new();
    let mut cells: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    for row in rows {
        let v = value(row);
        let entry = genomes
            .entry(row.genome_file.as_str())
            .or_insert_with(|| (truncate_label(row.display_label()), 0.0));
        entry.1 = entry.1.max(v);
        cells.insert((row.genome_file.as_str(), row.sample.as_str()), v);
    }
    let genomes: Vec<(&str, String)> = genomes
        .into_iter()
        .filter(|(_, (_, max))| *max > 0.0)
        .map(|(g, (label, _))| (g, label))
        .collect();

    let cell = 28.0;
    let (left, top) = (290.0, 40.0);
    let width = left + samples.len() as f64 * cell + 40.0;
    let height = top + genomes.len() as f64 * cell + 120.0;
    let mut svg = Svg::new(width, height);
    svg.text(10.0, 20.0, 14.0, "start", title);

    for (r, (genome, label)) in genomes.iter().enumerate() {
        let y = top + r as f64 * cell;
        svg.text(left - 6.0, y + cell / 2.0 + 4.0, 10.0, "end", label);
        for (c, sample) in samples.iter().enumerate() {
            let x = left + c as f64 * cell;
            let v = cells.get(&(*genome, sample.as_str())).copied().unwrap_or(0.0);
            svg.rect(x, y, cell, cell, &heat_color(v / scale));
            if v > 0.0 {
                svg.text(x + cell / 2.0, y + cell / 2.0 + 3.0, 7.0, "middle", &label_fmt(v));
            }
        }
    }
    for (c, sample) in samples.iter().enumerate() {
        let x = left + c as f64 * cell + cell / 2.0;
        svg.vertical_text(x, top + genomes.len() as f64 * cell + 8.0, 10.0, sample);
    }
    svg.save(path)
}

pub fn abundance_heatmap(rows: &[ReportRow], path: &Path) -> Result<()> {
    heatmap(
        rows,
        path,
        "Taxonomic abundance (%)",
        |r| r.taxonomic_abundance,
        100.0,
        |v| format!("{:.1}", v),
    )
}

pub fn containment_heatmap(rows: &[ReportRow], path: &Path) -> Result<()> {
    heatmap(
        rows,
        path,
        "Containment index",
        |r| r.containment_fraction(),
        1.0,
        |v| format!("{:.2}", v),
    )
}

/// Horizontal bars with the percentage of genes detected per HMO cluster.
pub fn hmo_cluster_plot(sample: &str, clusters: &[ClusterPresence], path: &Path) -> Result<()> {
    let bar_h = 20.0;
    let (left, top, plot_w) = (160.0, 40.0, 300.0);
    let height = top + clusters.len().max(1) as f64 * (bar_h + 6.0) + 40.0;
    let mut svg = Svg::new(left + plot_w + 80.0, height);
    svg.text(10.0, 20.0, 14.0, "start", &format!("{}: HMO gene clusters detected", sample));

    for (i, cluster) in clusters.iter().enumerate() {
        let y = top + i as f64 * (bar_h + 6.0);
        let w = cluster.percent.clamp(0.0, 100.0) / 100.0 * plot_w;
        let color = if cluster.present { "#2b8cbe" } else { "#a6bddb" };
        svg.text(left - 6.0, y + bar_h / 2.0 + 4.0, 10.0, "end", &cluster.cluster);
        svg.rect(left, y, w, bar_h, color);
        svg.text(
            left + w + 4.0,
            y + bar_h / 2.0 + 4.0,
            10.0,
            "start",
            &format!("{:.0}% ({}/{})", cluster.percent, cluster.genes_present, cluster.genes),
        );
    }
    let axis_y = top + clusters.len() as f64 * (bar_h + 6.0);
    svg.line(left, axis_y, left + plot_w, axis_y);
    svg.save(path)
}

/// Writes every run-level figure into `plots_dir` and returns their paths.
pub fn render_all(
    rows: &[ReportRow],
    clusters: &BTreeMap<String, Vec<ClusterPresence>>,
    plots_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(plots_dir)?;
    let mut written = Vec::new();

    let barplot = plots_dir.join("taxonomic_abundance_barplot.svg");
    abundance_barplot(rows, &barplot)?;
    written.push(barplot);

    let heat = plots_dir.join("taxonomic_abundance_heatmap.svg");
    abundance_heatmap(rows, &heat)?;
    written.push(heat);

    let containment = plots_dir.join("containment_heatmap.svg");
    containment_heatmap(rows, &containment)?;
    written.push(containment);

    for (sample, sample_clusters) in clusters {
        let path = plots_dir.join(format!("{}_hmo_cluster_detection.svg", sample));
        hmo_cluster_plot(sample, sample_clusters, &path)?;
        written.push(path);
    }

    info!("Wrote {} plots to {:?}", written.len(), plots_dir);
    Ok(written)
}
