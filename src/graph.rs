// PNG renderer: draws shaped chart payloads with plotters

use crate::ir::{ChartData, ChartKind, HeatmapMatrix, Rgb, Series, ThemeConfig, TimeHistogram, Treemap, TreemapNode, Value};
use crate::scale::{pad_range, ColourScale, ValueRange, DEFAULT_SCALE};
use anyhow::{Context, Result};
use image::ImageEncoder;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::ops::Range;

pub const DEFAULT_WIDTH: u32 = 800;

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

pub struct GraphConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Print each heatmap cell's value inside the cell
    pub show_values: bool,
}

impl GraphConfig {
    /// Default width, height from the resolved theme
    pub fn new(title: impl Into<String>, theme: &ThemeConfig) -> Self {
        GraphConfig {
            title: title.into(),
            width: DEFAULT_WIDTH,
            height: theme.figure_height,
            show_values: false,
        }
    }

    pub fn with_values(mut self, show_values: bool) -> Self {
        self.show_values = show_values;
        self
    }
}

/// Render one chart payload to PNG bytes
pub fn render_chart(kind: &ChartKind, data: &ChartData, theme: &ThemeConfig, config: &GraphConfig) -> Result<Vec<u8>> {
    let renderer: Box<dyn Renderer + '_> = match (data, kind) {
        (ChartData::Series(series), ChartKind::Line) => Box::new(LineRenderer(series)),
        (ChartData::Series(series), _) => Box::new(BarRenderer(series)),
        (ChartData::Heatmap(matrix), _) => Box::new(HeatmapRenderer(matrix, config.show_values)),
        (ChartData::TimeHistogram(hist), _) => Box::new(TimeHistogramRenderer(hist)),
        (ChartData::Treemap(tree), _) => Box::new(TreemapRenderer(tree)),
        (ChartData::Choropleth(_), _) => {
            anyhow::bail!("Choropleth maps need an external map renderer; export them as CSV instead")
        }
    };

    let mut buffer = vec![0u8; (config.width * config.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (config.width, config.height)).into_drawing_area();
        root.fill(&WHITE).context("Failed to fill background")?;
        renderer.draw(&root, theme, &config.title)?;
        root.present().context("Failed to present drawing")?;
    }
    encode_png(&buffer, config.width, config.height)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    {
        let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
        encoder
            .write_image(buffer, width, height, image::ColorType::Rgb8)
            .context("Failed to encode PNG")?;
    }
    Ok(png_bytes)
}

/// Trait for the per-payload drawing strategies
trait Renderer {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()>;
}

fn to_colour(rgb: Rgb) -> RGBColor {
    RGBColor(rgb.0, rgb.1, rgb.2)
}

fn continuous_scale(theme: &ThemeConfig) -> Result<ColourScale> {
    ColourScale::by_name(&theme.continuous_scale)
        .or_else(|| ColourScale::by_name(DEFAULT_SCALE))
        .context("No continuous colour scale available")
}

/// Label for a tick at `x` when categories sit on integer positions.
/// Ticks between categories stay blank.
fn index_label(labels: &[String], x: f64) -> String {
    let i = x.round();
    if (x - i).abs() > 1e-6 || i < 0.0 {
        return String::new();
    }
    labels.get(i as usize).cloned().unwrap_or_default()
}

fn index_range(n: usize) -> Range<f64> {
    -0.5..(n as f64 - 0.5)
}

/// X positions for a series. Integer keys (years, decades) sit on a
/// numeric axis, anything else is placed by sorted category index.
struct XAxis {
    labels: Option<Vec<String>>,
    points: Vec<(f64, f64)>,
}

impl XAxis {
    fn for_series(series: &Series, force_categorical: bool) -> XAxis {
        let numeric = series.points.iter().all(|(k, _)| matches!(k, Value::Int(_)));
        let (labels, mut points): (Option<Vec<String>>, Vec<(f64, f64)>) = if numeric && !force_categorical {
            let points = series
                .points
                .iter()
                .filter_map(|(k, y)| k.as_f64().map(|x| (x, *y)))
                .collect();
            (None, points)
        } else {
            let mut keys: Vec<&Value> = series.points.iter().map(|(k, _)| k).collect();
            keys.sort();
            keys.dedup();
            let points = series
                .points
                .iter()
                .filter_map(|(k, y)| keys.binary_search(&k).ok().map(|i| (i as f64, *y)))
                .collect();
            (Some(keys.iter().map(|k| k.to_string()).collect()), points)
        };
        points.retain(|(_, y)| y.is_finite());
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        XAxis { labels, points }
    }

    fn range(&self) -> Range<f64> {
        match &self.labels {
            Some(labels) => index_range(labels.len()),
            None => {
                let (lo, hi) = bounds(self.points.iter().map(|p| p.0));
                let (lo, hi) = pad_range(lo, hi);
                lo..hi
            }
        }
    }

    fn label(&self, x: f64) -> String {
        match &self.labels {
            Some(labels) => index_label(labels, x),
            None => format!("{:.0}", x),
        }
    }

    fn tick_count(&self) -> usize {
        self.labels.as_ref().map_or(10, |l| l.len().max(1))
    }
}

fn bounds<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Bars grow from zero, so the y axis starts there
fn bar_height_range<I: IntoIterator<Item = f64>>(values: I) -> Range<f64> {
    let (_, max) = bounds(values);
    if max.is_finite() && max > 0.0 {
        0.0..max * 1.05
    } else {
        0.0..1.0
    }
}

struct LineRenderer<'a>(&'a Series);

impl Renderer for LineRenderer<'_> {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()> {
        let series = self.0;
        let axis = XAxis::for_series(series, false);
        if axis.points.is_empty() {
            anyhow::bail!("Cannot create graph with no data points");
        }
        let (y_min, y_max) = bounds(axis.points.iter().map(|p| p.1));
        let (y_lo, y_hi) = pad_range(y_min, y_max);

        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .caption(title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(axis.range(), y_lo..y_hi)
            .context("Failed to build chart")?;

        let formatter = |x: &f64| axis.label(*x);
        chart
            .configure_mesh()
            .x_desc(&series.x_label)
            .y_desc(&series.y_label)
            .x_labels(axis.tick_count())
            .x_label_formatter(&formatter)
            .draw()
            .context("Failed to draw mesh")?;

        let colour = to_colour(theme.discrete_colour.rgb);
        chart
            .draw_series(LineSeries::new(axis.points.iter().copied(), colour.stroke_width(2)))
            .context("Failed to draw line series")?;
        Ok(())
    }
}

struct BarRenderer<'a>(&'a Series);

impl Renderer for BarRenderer<'_> {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()> {
        let series = self.0;
        let axis = XAxis::for_series(series, true);
        if axis.points.is_empty() {
            anyhow::bail!("Cannot create graph with no data points");
        }

        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .caption(title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(axis.range(), bar_height_range(axis.points.iter().map(|p| p.1)))
            .context("Failed to build chart")?;

        let formatter = |x: &f64| axis.label(*x);
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(&series.x_label)
            .y_desc(&series.y_label)
            .x_labels(axis.tick_count())
            .x_label_formatter(&formatter)
            .draw()
            .context("Failed to draw mesh")?;

        let colour = to_colour(theme.discrete_colour.rgb);
        chart
            .draw_series(
                axis.points
                    .iter()
                    .map(|&(x, y)| Rectangle::new([(x - 0.4, 0.0), (x + 0.4, y)], colour.filled())),
            )
            .context("Failed to draw bars")?;
        Ok(())
    }
}

struct HeatmapRenderer<'a>(&'a HeatmapMatrix, bool);

impl Renderer for HeatmapRenderer<'_> {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()> {
        let matrix = self.0;
        if matrix.rows.is_empty() || matrix.cols.is_empty() {
            anyhow::bail!("Cannot create heatmap with no cells");
        }
        let scale = continuous_scale(theme)?;
        let range = ValueRange::from_values(matrix.cells.iter().flatten().flatten().copied());
        let col_labels: Vec<String> = matrix.cols.iter().map(ToString::to_string).collect();
        let row_labels: Vec<String> = matrix.rows.iter().map(ToString::to_string).collect();

        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .caption(format!("{} ({})", title, matrix.value_label), ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(90)
            .build_cartesian_2d(index_range(col_labels.len()), index_range(row_labels.len()))
            .context("Failed to build chart")?;

        let x_formatter = |x: &f64| index_label(&col_labels, *x);
        let y_formatter = |y: &f64| index_label(&row_labels, *y);
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc(&matrix.col_label)
            .y_desc(&matrix.row_label)
            .x_labels(col_labels.len())
            .y_labels(row_labels.len())
            .x_label_formatter(&x_formatter)
            .y_label_formatter(&y_formatter)
            .draw()
            .context("Failed to draw mesh")?;

        // Gaps stay blank
        let cells: Vec<(f64, f64, f64)> = matrix
            .cells
            .iter()
            .enumerate()
            .flat_map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .filter_map(move |(c, v)| v.filter(|v| v.is_finite()).map(|v| (r as f64, c as f64, v)))
            })
            .collect();
        chart
            .draw_series(cells.iter().map(|&(r, c, v)| {
                let colour = to_colour(scale.colour_at(range.map_or(0.5, |rg| rg.normalize(v))));
                Rectangle::new([(c - 0.5, r - 0.5), (c + 0.5, r + 0.5)], colour.filled())
            }))
            .context("Failed to draw heatmap cells")?;

        if self.1 {
            let style = ("sans-serif", 11)
                .into_font()
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, VPos::Center));
            chart
                .draw_series(cells.iter().map(|&(r, c, v)| Text::new(cell_label(v), (c, r), style.clone())))
                .context("Failed to draw heatmap values")?;
        }
        Ok(())
    }
}

/// Whole numbers print bare, anything else with one decimal
fn cell_label(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

struct TimeHistogramRenderer<'a>(&'a TimeHistogram);

impl Renderer for TimeHistogramRenderer<'_> {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()> {
        let hist = self.0;
        if hist.bins.is_empty() {
            anyhow::bail!("Cannot create graph with no data points");
        }
        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .caption(title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..24.0, bar_height_range(hist.bins.iter().map(|b| b.count)))
            .context("Failed to build chart")?;

        let formatter = |x: &f64| {
            let minutes = (x * 60.0).round() as u32;
            format!("{:02}:{:02}", minutes / 60, minutes % 60)
        };
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc("Time")
            .y_desc(&hist.value_label)
            .x_labels(13)
            .x_label_formatter(&formatter)
            .draw()
            .context("Failed to draw mesh")?;

        let colour = to_colour(theme.discrete_colour.rgb);
        chart
            .draw_series(hist.bins.iter().filter(|b| b.count > 0.0).map(|bin| {
                let start = bin.offset_seconds() / 3600.0;
                let end = start + bin.width_seconds() / 3600.0;
                Rectangle::new([(start, 0.0), (end, bin.count)], colour.filled())
            }))
            .context("Failed to draw time bins")?;
        Ok(())
    }
}

/// A laid-out treemap leaf: `[x0, y0, x1, y1]` in pixels
struct Tile<'a> {
    rect: [f64; 4],
    node: &'a TreemapNode,
}

/// Slice-and-dice layout. Siblings split their parent's rectangle in
/// proportion to their summed values, alternating direction per level.
fn slice_and_dice<'a>(nodes: &[&'a TreemapNode], depth: usize, rect: [f64; 4], vertical: bool, tiles: &mut Vec<Tile<'a>>) {
    let mut groups: Vec<(&'a str, Vec<&'a TreemapNode>)> = Vec::new();
    for &node in nodes {
        let Some(name) = node.path.get(depth) else {
            continue;
        };
        match groups.iter_mut().find(|(n, _)| *n == name.as_str()) {
            Some((_, members)) => members.push(node),
            None => groups.push((name.as_str(), vec![node])),
        }
    }

    let group_total = |members: &[&TreemapNode]| members.iter().map(|n| n.value).sum::<f64>();
    let total: f64 = groups.iter().map(|(_, members)| group_total(members)).sum();
    if total <= 0.0 {
        return;
    }

    let [x0, y0, x1, y1] = rect;
    let mut offset = 0.0;
    for (_, members) in &groups {
        let share = group_total(members) / total;
        let sub = if vertical {
            [x0, y0 + (y1 - y0) * offset, x1, y0 + (y1 - y0) * (offset + share)]
        } else {
            [x0 + (x1 - x0) * offset, y0, x0 + (x1 - x0) * (offset + share), y1]
        };
        offset += share;
        match members.as_slice() {
            [leaf] if leaf.path.len() == depth + 1 => tiles.push(Tile { rect: sub, node: *leaf }),
            _ => slice_and_dice(members, depth + 1, sub, !vertical, tiles),
        }
    }
}

struct TreemapRenderer<'a>(&'a Treemap);

impl Renderer for TreemapRenderer<'_> {
    fn draw(&self, root: &Area<'_>, theme: &ThemeConfig, title: &str) -> Result<()> {
        let tree = self.0;
        if tree.nodes.is_empty() {
            anyhow::bail!("Cannot create treemap with no nodes above the threshold");
        }
        let scale = continuous_scale(theme)?;
        let area = root
            .titled(&format!("{} ({})", title, tree.value_label), ("sans-serif", 20).into_font())
            .context("Failed to draw title")?;
        let (width, height) = area.dim_in_pixel();

        let nodes: Vec<&TreemapNode> = tree.nodes.iter().collect();
        let mut tiles = Vec::new();
        // Depth 0 is the shared root
        slice_and_dice(&nodes, 1, [0.0, 0.0, width as f64, height as f64], false, &mut tiles);

        let range = ValueRange::from_values(tree.nodes.iter().map(|n| n.value));
        for tile in &tiles {
            let [x0, y0, x1, y1] = tile.rect.map(|v| v.round() as i32);
            let colour = to_colour(scale.colour_at(range.map_or(0.5, |r| r.normalize(tile.node.value))));
            area.draw(&Rectangle::new([(x0, y0), (x1, y1)], colour.filled()))
                .context("Failed to draw treemap tile")?;
            area.draw(&Rectangle::new([(x0, y0), (x1, y1)], WHITE.stroke_width(1)))
                .context("Failed to draw treemap border")?;
            if x1 - x0 > 40 && y1 - y0 > 14 {
                let label = tile.node.path.last().cloned().unwrap_or_default();
                area.draw(&Text::new(label, (x0 + 3, y0 + 3), ("sans-serif", 12).into_font()))
                    .context("Failed to draw treemap label")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Choropleth, DiscreteColour, MapScope};

    fn theme() -> ThemeConfig {
        ThemeConfig {
            discrete_colour: DiscreteColour { label: "#1F77B4".into(), rgb: Rgb(0x1F, 0x77, 0xB4) },
            continuous_scale: "jet".into(),
            figure_height: 400,
        }
    }

    fn is_png(bytes: &[u8]) -> bool {
        bytes.len() > 8 && bytes[0..8] == [137, 80, 78, 71, 13, 10, 26, 10]
    }

    fn year_series() -> Series {
        Series {
            x_label: "Year".into(),
            y_label: "Crashes".into(),
            points: vec![(Value::Int(2001), 3.0), (Value::Int(2002), 1.0), (Value::Int(2003), f64::NAN)],
        }
    }

    #[test]
    fn test_render_line_and_histogram() {
        let data = ChartData::Series(year_series());
        let config = GraphConfig::new("Crashes per year", &theme());
        for kind in [ChartKind::Line, ChartKind::Histogram] {
            let png = render_chart(&kind, &data, &theme(), &config).unwrap();
            assert!(is_png(&png));
        }
    }

    #[test]
    fn test_render_heatmap_with_gaps() {
        let matrix = HeatmapMatrix {
            row_label: "Month".into(),
            col_label: "Day_of_week".into(),
            value_label: "Crashes".into(),
            rows: vec![Value::Month(1), Value::Month(2)],
            cols: vec![Value::Weekday(0), Value::Weekday(1)],
            cells: vec![vec![Some(1.0), None], vec![Some(4.0), Some(2.0)]],
        };
        let config = GraphConfig::new("Heatmap", &theme());
        let data = ChartData::Heatmap(matrix);
        let plain = render_chart(&ChartKind::HeatmapMatrix, &data, &theme(), &config).unwrap();
        assert!(is_png(&plain));

        let labelled = render_chart(&ChartKind::HeatmapMatrix, &data, &theme(), &config.with_values(true)).unwrap();
        assert!(is_png(&labelled));
        assert_ne!(plain, labelled);
    }

    #[test]
    fn test_cell_labels() {
        assert_eq!(cell_label(4.0), "4");
        assert_eq!(cell_label(2.34), "2.3");
        assert_eq!(cell_label(-3.0), "-3");
    }

    #[test]
    fn test_choropleth_is_not_drawn() {
        let map = Choropleth {
            scope: MapScope::UsState,
            value_label: "Crashes".into(),
            locations: vec![("TX".into(), 1.0)],
            omitted: vec![],
        };
        let kind = ChartKind::Choropleth(MapScope::UsState);
        let config = GraphConfig::new("Map", &theme());
        let err = render_chart(&kind, &ChartData::Choropleth(map), &theme(), &config).unwrap_err();
        assert!(err.to_string().contains("CSV"));
    }

    #[test]
    fn test_empty_series_fails() {
        let series = Series { x_label: "Year".into(), y_label: "Crashes".into(), points: vec![] };
        let config = GraphConfig::new("Empty", &theme());
        assert!(render_chart(&ChartKind::Line, &ChartData::Series(series), &theme(), &config).is_err());
    }

    #[test]
    fn test_categorical_axis_sorted_by_value() {
        let series = Series {
            x_label: "Month".into(),
            y_label: "Crashes".into(),
            points: vec![(Value::Month(3), 2.0), (Value::Month(1), 5.0)],
        };
        let axis = XAxis::for_series(&series, false);
        assert_eq!(axis.labels, Some(vec!["January".to_string(), "March".to_string()]));
        assert_eq!(axis.points, vec![(0.0, 5.0), (1.0, 2.0)]);
        assert_eq!(axis.label(1.0), "March");
        assert_eq!(axis.label(0.5), "");
    }

    #[test]
    fn test_numeric_axis_drops_nan() {
        let axis = XAxis::for_series(&year_series(), false);
        assert!(axis.labels.is_none());
        assert_eq!(axis.points, vec![(2001.0, 3.0), (2002.0, 1.0)]);
    }

    #[test]
    fn test_slice_and_dice_covers_area() {
        let node = |path: &[&str], value| TreemapNode { path: path.iter().map(|s| s.to_string()).collect(), value };
        let nodes = vec![
            node(&["World", "Europe", "Spain"], 6.0),
            node(&["World", "Europe", "France"], 2.0),
            node(&["World", "Asia", "Japan"], 8.0),
        ];
        let refs: Vec<&TreemapNode> = nodes.iter().collect();
        let mut tiles = Vec::new();
        slice_and_dice(&refs, 1, [0.0, 0.0, 100.0, 100.0], false, &mut tiles);
        assert_eq!(tiles.len(), 3);
        let area: f64 = tiles.iter().map(|t| (t.rect[2] - t.rect[0]) * (t.rect[3] - t.rect[1])).sum();
        assert!((area - 10_000.0).abs() < 1e-6);
        // Europe takes the left half, Spain three quarters of it
        let spain = tiles.iter().find(|t| t.node.path[2] == "Spain").unwrap();
        assert!((spain.rect[2] - 50.0).abs() < 1e-9);
        assert!((spain.rect[3] - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_treemap() {
        let tree = Treemap {
            value_label: "Crashes".into(),
            nodes: vec![
                TreemapNode { path: vec!["World".into(), "Peru".into()], value: 6.0 },
                TreemapNode { path: vec!["World".into(), "Chile".into()], value: 9.0 },
            ],
        };
        let config = GraphConfig::new("Treemap", &theme());
        let kind = ChartKind::Treemap { min_count: 5.0, with_continent: false, exclude_us: false };
        assert!(is_png(&render_chart(&kind, &ChartData::Treemap(tree), &theme(), &config).unwrap()));
    }
}
