// Dashboard page executor: runs the pipeline once per chart of a page

use crate::aggregate::aggregate;
use crate::filter;
use crate::ir::{
    is_united_states, Aggregation, AggregationSpec, ChartData, ChartKind, DateComponent, Field, FilterState,
    GroupDimension, MapScope, Value,
};
use crate::shaper::{decade_windows, ChartShaper};
use crate::store::Table;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

pub const NORTH_AMERICA: &str = "North America";

/// Per-page settings that are not filters
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub aggregation: Aggregation,
    pub exclude_us_from_world_map: bool,
    pub exclude_us_from_treemaps: bool,
    /// Decades per year x month heatmap
    pub decade_window: usize,
    pub treemap_min: f64,
    pub time_bins: usize,
    pub treemaps: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        PageOptions {
            aggregation: Aggregation::Count,
            exclude_us_from_world_map: false,
            exclude_us_from_treemaps: false,
            decade_window: 4,
            treemap_min: 5.0,
            time_bins: 48,
            treemaps: true,
        }
    }
}

/// One chart of a page. A failed chart keeps its error here and does not
/// stop the rest of the page.
#[derive(Debug)]
pub struct ChartOutcome {
    pub title: String,
    pub kind: ChartKind,
    pub result: Result<ChartData>,
}

impl ChartOutcome {
    /// Lower-case, dash-separated title, for output file names
    pub fn file_stem(&self) -> String {
        self.title
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// A single-aggregation chart, planned before any data is touched
struct ChartRequest {
    title: String,
    kind: ChartKind,
    spec: AggregationSpec,
}

impl ChartRequest {
    fn new(title: &str, kind: ChartKind, dimensions: Vec<GroupDimension>, aggregation: Aggregation) -> Self {
        ChartRequest {
            title: title.to_string(),
            kind,
            spec: AggregationSpec::count(dimensions).with_aggregation(aggregation),
        }
    }

    fn date_name(mut self, name: &str) -> Self {
        self.spec = self.spec.with_date_name(name);
        self
    }
}

pub struct DashboardPage {
    shaper: ChartShaper,
    options: PageOptions,
}

fn named(field: Field) -> GroupDimension {
    GroupDimension::Named(field)
}

/// A dimension counts as filtered through either its stored column or the
/// matching date component
fn is_filtered(filters: &FilterState, field: Field, component: Option<DateComponent>) -> bool {
    filters.is_active(named(field)) || component.is_some_and(|c| filters.is_active(GroupDimension::Derived(c)))
}

impl DashboardPage {
    pub fn new(shaper: ChartShaper, options: PageOptions) -> Self {
        DashboardPage { shaper, options }
    }

    pub fn options(&self) -> &PageOptions {
        &self.options
    }

    pub fn title(&self) -> String {
        self.options.aggregation.title()
    }

    /// Build every chart the page shows for `filters`
    pub fn build(&self, table: &Table, filters: &FilterState) -> Vec<ChartOutcome> {
        let view = filter::apply(table, filters);
        info!(records = view.len(), filters = filters.active().count(), "building page");

        let (before_heatmaps, after_heatmaps) = self.plan(filters);
        let mut outcomes: Vec<ChartOutcome> = before_heatmaps.into_iter().map(|r| self.run(&view, r)).collect();
        if self.show_heatmaps(filters) {
            outcomes.extend(self.year_month_heatmaps(&view));
            outcomes.extend(self.heatmap_requests().into_iter().map(|r| self.run(&view, r)));
        }
        outcomes.extend(after_heatmaps.into_iter().map(|r| self.run(&view, r)));

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(charts = outcomes.len(), failed, "page built");
        outcomes
    }

    fn run(&self, table: &Table, request: ChartRequest) -> ChartOutcome {
        let result = aggregate(table, &request.spec)
            .and_then(|agg| self.shaper.shape(&agg, &request.kind))
            .with_context(|| format!("Failed to build chart '{}'", request.title));
        if let Err(err) = &result {
            let message = format!("{:#}", err);
            warn!(chart = %request.title, error = %message, "chart failed");
        }
        ChartOutcome {
            title: request.title,
            kind: request.kind,
            result,
        }
    }

    /// Charts before and after the heatmap section, in page order
    fn plan(&self, filters: &FilterState) -> (Vec<ChartRequest>, Vec<ChartRequest>) {
        let agg = self.options.aggregation;
        let mut before = Vec::new();

        if !is_filtered(filters, Field::Year, Some(DateComponent::Year)) {
            before.push(
                ChartRequest::new("Per year", ChartKind::Line, vec![GroupDimension::Derived(DateComponent::Year)], agg)
                    .date_name("Year"),
            );
        }

        // Each histogram is skipped when its own dimension is filtered
        let histograms = [
            ("Per decade", Field::Decade, Some(DateComponent::Decade)),
            ("Per month", Field::Month, Some(DateComponent::Month)),
            ("Per day number", Field::DayOfMonth, Some(DateComponent::DayOfMonth)),
            ("Per day", Field::DayOfWeek, Some(DateComponent::DayOfWeek)),
        ];
        for (title, field, component) in histograms {
            if is_filtered(filters, field, component) {
                debug!(chart = title, "skipped, dimension is filtered");
                continue;
            }
            let request = match field {
                Field::DayOfMonth => ChartRequest::new(
                    title,
                    ChartKind::Histogram,
                    vec![GroupDimension::Derived(DateComponent::DayOfMonth)],
                    agg,
                )
                .date_name("Day"),
                _ => ChartRequest::new(title, ChartKind::Histogram, vec![named(field)], agg),
            };
            before.push(request);
        }

        before.push(ChartRequest::new(
            "Time of day",
            ChartKind::TimeHistogram { nbins: self.options.time_bins },
            vec![named(Field::TimeOfDay)],
            agg,
        ));

        if !filters.is_active(named(Field::Country)) {
            let exclude_us = self.options.exclude_us_from_world_map;
            before.push(ChartRequest::new(
                "Crashes throughout the world",
                ChartKind::Choropleth(MapScope::World { exclude_us }),
                vec![named(Field::Country)],
                agg,
            ));
        }
        if show_us_map(filters) {
            before.push(ChartRequest::new(
                "Crashes throughout the US",
                ChartKind::Choropleth(MapScope::UsState),
                vec![named(Field::UsState)],
                agg,
            ));
        }

        let mut after = Vec::new();
        if self.options.treemaps && !filters.is_active(named(Field::Country)) {
            let min_count = self.options.treemap_min;
            let exclude_us = self.options.exclude_us_from_treemaps;
            after.push(ChartRequest::new(
                "Countries",
                ChartKind::Treemap { min_count, with_continent: false, exclude_us },
                vec![named(Field::Country)],
                agg,
            ));
            after.push(ChartRequest::new(
                "Continents and countries",
                ChartKind::Treemap { min_count, with_continent: true, exclude_us },
                vec![named(Field::Continent), named(Field::Country)],
                agg,
            ));
        }
        (before, after)
    }

    /// Heatmaps need all or none of the year, month, weekday and day filters
    fn show_heatmaps(&self, filters: &FilterState) -> bool {
        let date_filters = [
            is_filtered(filters, Field::Year, Some(DateComponent::Year)),
            is_filtered(filters, Field::Month, Some(DateComponent::Month)),
            is_filtered(filters, Field::DayOfWeek, Some(DateComponent::DayOfWeek)),
            is_filtered(filters, Field::DayOfMonth, Some(DateComponent::DayOfMonth)),
        ];
        date_filters.iter().all(|f| *f) || !date_filters.iter().any(|f| *f)
    }

    fn heatmap_requests(&self) -> Vec<ChartRequest> {
        let agg = self.options.aggregation;
        vec![
            ChartRequest::new(
                "Month and day",
                ChartKind::HeatmapMatrix,
                vec![named(Field::Month), named(Field::DayOfWeek)],
                agg,
            ),
            ChartRequest::new(
                "Month and day number",
                ChartKind::HeatmapMatrix,
                vec![named(Field::Month), GroupDimension::Derived(DateComponent::DayOfMonth)],
                agg,
            )
            .date_name("Day"),
        ]
    }

    fn year_month_heatmaps(&self, table: &Table) -> Vec<ChartOutcome> {
        decade_windows(table, self.options.aggregation, self.options.decade_window)
            .map(|window| {
                let result = window.map_err(anyhow::Error::from);
                let title = match &result {
                    Ok(w) => match (w.decades.first(), w.decades.last()) {
                        (Some(first), Some(last)) => format!("Year and month, {}s to {}s", first, last),
                        _ => "Year and month".to_string(),
                    },
                    Err(_) => "Year and month".to_string(),
                };
                ChartOutcome {
                    result: result
                        .map(|w| ChartData::Heatmap(w.matrix))
                        .with_context(|| format!("Failed to build chart '{}'", title)),
                    title,
                    kind: ChartKind::HeatmapMatrix,
                }
            })
            .collect()
    }
}

/// The US map shows when the US is the selected country, North America the
/// selected continent, or no location filter is on
fn show_us_map(filters: &FilterState) -> bool {
    let country = filters.selected(named(Field::Country));
    let continent = filters.selected(named(Field::Continent));
    let us_selected = matches!(country, Some(Value::Text(c)) if is_united_states(c));
    let north_america = matches!(continent, Some(Value::Text(c)) if c.eq_ignore_ascii_case(NORTH_AMERICA));
    let no_location_filter = !filters.is_active(named(Field::Country)) && !filters.is_active(named(Field::Continent));
    us_selected || north_america || no_location_filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AggFunc, Measure, Record};
    use crate::regions::StateCodes;
    use chrono::{NaiveDate, NaiveTime};

    fn page(options: PageOptions) -> DashboardPage {
        DashboardPage::new(ChartShaper::new(StateCodes::embedded().unwrap()), options)
    }

    fn table() -> Table {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let us = |date| {
            Record::new(date, "United States of America")
                .with_us_state(Some("Texas".to_string()))
                .with_continent(Some("North America".to_string()))
        };
        Table::from_records(vec![
            us(d(1975, 3, 2)).with_fatalities(Some(10)).with_time(NaiveTime::from_hms_opt(9, 30, 0)),
            us(d(1999, 7, 14)).with_fatalities(Some(2)),
            Record::new(d(2001, 1, 5), "Spain")
                .with_continent(Some("Europe".to_string()))
                .with_fatalities(Some(5)),
            Record::new(d(2001, 1, 9), "Peru").with_fatalities(None),
        ])
    }

    fn titles(outcomes: &[ChartOutcome]) -> Vec<&str> {
        outcomes.iter().map(|o| o.title.as_str()).collect()
    }

    #[test]
    fn test_unfiltered_page_has_every_chart() {
        let outcomes = page(PageOptions::default()).build(&table(), &FilterState::new());
        let names = titles(&outcomes);
        for expected in [
            "Per year",
            "Per decade",
            "Per month",
            "Per day number",
            "Per day",
            "Time of day",
            "Crashes throughout the world",
            "Crashes throughout the US",
            "Month and day",
            "Month and day number",
            "Countries",
            "Continents and countries",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        // 1970s .. 2000s in one window of four decades
        assert!(names.contains(&"Year and month, 1970s to 2000s"));
    }

    #[test]
    fn test_filtered_dimensions_skip_their_charts() {
        let filters = FilterState::new().select("year", "2001").unwrap().select("month", "January").unwrap();
        let outcomes = page(PageOptions::default()).build(&table(), &filters);
        let names = titles(&outcomes);
        assert!(!names.contains(&"Per year"));
        assert!(!names.contains(&"Per month"));
        assert!(names.contains(&"Per day"));
        // Two of four date filters: no heatmaps
        assert!(!names.iter().any(|n| n.starts_with("Year and month") || n.starts_with("Month and day")));
    }

    #[test]
    fn test_country_filter_hides_maps_and_treemaps() {
        let filters = FilterState::new().select("country", "Spain").unwrap();
        let names: Vec<String> = page(PageOptions::default())
            .build(&table(), &filters)
            .into_iter()
            .map(|o| o.title)
            .collect();
        assert!(!names.iter().any(|n| n.starts_with("Crashes throughout")));
        assert!(!names.iter().any(|n| n == "Countries"));
    }

    #[test]
    fn test_us_map_conditions() {
        let us = FilterState::new().select("country", "United States of America").unwrap();
        assert!(show_us_map(&us));
        let na = FilterState::new().select("continent", "North America").unwrap();
        assert!(show_us_map(&na));
        let europe = FilterState::new().select("continent", "Europe").unwrap();
        assert!(!show_us_map(&europe));
        assert!(show_us_map(&FilterState::new()));
    }

    #[test]
    fn test_failing_chart_does_not_stop_page() {
        let page = page(PageOptions::default());
        let view = table();
        let broken = ChartRequest::new(
            "Broken",
            ChartKind::Line,
            vec![named(Field::Country), named(Field::Year)],
            Aggregation::Count,
        );
        let outcome = page.run(&view, broken);
        let err = outcome.result.unwrap_err();
        assert!(format!("{:#}", err).contains("Broken"));

        let outcomes = page.build(&view, &FilterState::new());
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[test]
    fn test_fatalities_page_uses_sum() {
        let options = PageOptions {
            aggregation: Aggregation::Apply { func: AggFunc::Sum, measure: Measure::Fatalities },
            treemap_min: 0.0,
            ..PageOptions::default()
        };
        let page = page(options);
        assert_eq!(page.title(), "Sum of fatalities");
        let outcomes = page.build(&table(), &FilterState::new());
        let countries = outcomes.iter().find(|o| o.title == "Countries").unwrap();
        let Ok(ChartData::Treemap(tree)) = &countries.result else {
            panic!("Expected treemap");
        };
        let us = tree.nodes.iter().find(|n| n.path.last().unwrap() == "United States of America").unwrap();
        assert_eq!(us.value, 12.0);
        // Peru has no fatality figures at all: NaN, left out of the treemap
        assert!(!tree.nodes.iter().any(|n| n.path.last().unwrap() == "Peru"));
    }

    #[test]
    fn test_file_stem() {
        let outcome = ChartOutcome {
            title: "Year and month, 1970s to 2000s".to_string(),
            kind: ChartKind::HeatmapMatrix,
            result: Err(anyhow::anyhow!("unused")),
        };
        assert_eq!(outcome.file_stem(), "year-and-month-1970s-to-2000s");
    }
}
