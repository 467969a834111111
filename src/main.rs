use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crashviz::aggregate::aggregate;
use crashviz::config::{
    DashboardConfig, DEFAULT_DATA_PATH, DEFAULT_DECADE_WINDOW, DEFAULT_TIME_BINS, DEFAULT_TREEMAP_MIN,
};
use crashviz::export;
use crashviz::filter;
use crashviz::graph::{self, GraphConfig};
use crashviz::ir::{ChartData, ChartKind, FilterState, MapScope};
use crashviz::palette::{ColourChoice, UserChoices};
use crashviz::resolve::{resolve_aggregation, resolve_spec};
use crashviz::runtime::DashboardPage;
use crashviz::shaper::{ChartShaper, MAX_TIME_BINS};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crashviz")]
#[command(about = "Aggregate and chart a historical aviation accident dataset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render every chart of a dashboard page into a directory
    Page(PageArgs),
    /// Run one aggregation and write the result as CSV to stdout
    Chart(ChartArgs),
    /// Print the processed dataset, with derived calendar fields, as CSV
    Data(DataArgs),
    /// List the allowed colour names
    Colours {
        #[arg(long = "colours", help = "Colour name list, one per line (defaults to the built-in list)")]
        colours: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct DataArgs {
    #[arg(long = "data", default_value = DEFAULT_DATA_PATH, help = "Cleaned dataset CSV")]
    data: PathBuf,

    #[arg(long = "state-codes", help = "US state code JSON (defaults to the built-in table)")]
    state_codes: Option<PathBuf>,

    #[arg(short = 'f', long = "filter", value_name = "DIM=VALUE[|VALUE...]", help = "Restrict to matching records (repeatable)")]
    filters: Vec<String>,

    #[arg(long = "passenger-only", help = "Keep commercial passenger flights only")]
    passenger_only: bool,

    #[arg(long = "func", help = "Aggregation function: sum, mean, median, min, max, count")]
    func: Option<String>,

    #[arg(long = "measure", help = "Measure to aggregate: fatalities, aboard, survivors")]
    measure: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Png,
    Csv,
}

#[derive(Args, Debug)]
struct PageArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long = "colour", conflicts_with = "hex", help = "CSS colour name for plots")]
    colour: Option<String>,

    #[arg(long = "hex", help = "Hex colour for plots, e.g. #1F77B4")]
    hex: Option<String>,

    #[arg(long = "scale", help = "Continuous colour scale for heatmaps and treemaps")]
    scale: Option<String>,

    #[arg(long = "height", help = "Figure height in pixels (400-800, steps of 50)")]
    height: Option<u32>,

    #[arg(long = "colours", help = "Colour name list, one per line (defaults to the built-in list)")]
    colours: Option<PathBuf>,

    #[arg(long = "strict-theme", help = "Fail on invalid colour choices instead of falling back")]
    strict_theme: bool,

    #[arg(long = "exclude-us-world", help = "Leave the US out of the world map")]
    exclude_us_world: bool,

    #[arg(long = "exclude-us-treemaps", help = "Leave the US out of the treemaps")]
    exclude_us_treemaps: bool,

    #[arg(long = "show-values", help = "Print values inside heatmap cells")]
    show_values: bool,

    #[arg(long = "no-treemaps", help = "Skip the treemap section")]
    no_treemaps: bool,

    #[arg(long = "decade-window", default_value_t = DEFAULT_DECADE_WINDOW, help = "Decades per year/month heatmap")]
    decade_window: usize,

    #[arg(long = "min-count", default_value_t = DEFAULT_TREEMAP_MIN, help = "Smallest value shown in treemaps")]
    min_count: f64,

    #[arg(long = "time-bins", default_value_t = DEFAULT_TIME_BINS, help = "Bins of the time-of-day histogram")]
    time_bins: usize,

    #[arg(short = 'o', long = "out-dir", default_value = "dashboard", help = "Output directory")]
    out_dir: PathBuf,

    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Png)]
    format: OutputFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ChartType {
    /// The aggregated table itself
    Table,
    Line,
    Histogram,
    World,
    Usa,
    Treemap,
    Heatmap,
    Time,
}

#[derive(Args, Debug)]
struct ChartArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(short = 'g', long = "group", required = true, help = "Comma-separated grouping dimensions, e.g. country or date.year")]
    group: String,

    #[arg(long = "date-name", help = "Column name for a date-derived dimension")]
    date_name: Option<String>,

    #[arg(long = "sort", help = "Sort by value: asc or desc")]
    sort: Option<String>,

    #[arg(short = 'k', long = "kind", value_enum, default_value_t = ChartType::Table)]
    kind: ChartType,

    #[arg(long = "exclude-us", help = "Leave the US out of world maps and treemaps")]
    exclude_us: bool,

    #[arg(long = "min-count", default_value_t = DEFAULT_TREEMAP_MIN, help = "Smallest value shown in treemaps")]
    min_count: f64,

    #[arg(long = "time-bins", default_value_t = DEFAULT_TIME_BINS, help = "Bins of the time-of-day histogram")]
    time_bins: usize,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Page(args) => run_page(args),
        Command::Chart(args) => run_chart(args),
        Command::Data(args) => run_data(args),
        Command::Colours { colours } => list_colours(colours),
    }
}

/// Logs go to stderr; stdout carries CSV payloads
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
}

fn parse_filters(args: &DataArgs) -> Result<FilterState> {
    let mut state = FilterState::new();
    for raw in &args.filters {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("Filter '{}' must look like DIM=VALUE", raw))?;
        let values: Vec<&str> = value.split('|').collect();
        state = match values.as_slice() {
            [single] => state.select(name, single),
            many => state.select_any(name, many),
        }
        .with_context(|| format!("Invalid filter '{}'", raw))?;
    }
    if args.passenger_only {
        state = state.passenger_only();
    }
    Ok(state)
}

fn dashboard_config(data: &DataArgs) -> DashboardConfig {
    DashboardConfig {
        data_path: data.data.clone(),
        state_codes_path: data.state_codes.clone(),
        ..DashboardConfig::default()
    }
}

fn run_page(args: PageArgs) -> Result<()> {
    let config = DashboardConfig {
        colours_path: args.colours.clone(),
        decade_window: args.decade_window,
        treemap_min: args.min_count,
        time_bins: args.time_bins,
        ..dashboard_config(&args.data)
    };

    // Names are checked before the dataset is read
    let aggregation = resolve_aggregation(args.data.func.as_deref(), args.data.measure.as_deref())
        .context("Invalid page measure")?;
    let filters = parse_filters(&args.data)?;
    let choices = UserChoices {
        colour: match (&args.colour, &args.hex) {
            (_, Some(hex)) => Some(ColourChoice::Hex(hex.clone())),
            (Some(name), None) => Some(ColourChoice::Css(name.clone())),
            (None, None) => None,
        },
        continuous_scale: args.scale.clone(),
        figure_height: args.height,
    };
    let resolver = config.theme_resolver().context("Failed to load colour list")?;
    let theme = if args.strict_theme {
        resolver.try_resolve(&choices).context("Invalid theme")?
    } else {
        resolver.resolve(&choices)
    };

    let store = config.load_store().context("Failed to load dataset")?;
    let shaper = ChartShaper::new(config.state_codes().context("Failed to load state codes")?);
    let mut options = config.page_options(aggregation);
    options.exclude_us_from_world_map = args.exclude_us_world;
    options.exclude_us_from_treemaps = args.exclude_us_treemaps;
    options.treemaps = !args.no_treemaps;
    let page = DashboardPage::new(shaper, options);

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory {}", args.out_dir.display()))?;
    info!(title = %page.title(), out_dir = %args.out_dir.display(), "rendering page");

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let mut failures = 0;
    for (i, outcome) in page.build(&store.table(), &filters).into_iter().enumerate() {
        let stem = format!("{:02}-{}", i + 1, outcome.file_stem());
        let written = outcome.result.and_then(|data| {
            // Maps have no PNG renderer here
            let as_png = args.format == OutputFormat::Png && !matches!(data, ChartData::Choropleth(_));
            if as_png {
                let png = graph::render_chart(
                    &outcome.kind,
                    &data,
                    &theme,
                    &GraphConfig::new(&outcome.title, &theme).with_values(args.show_values),
                )?;
                let path = args.out_dir.join(format!("{}.png", stem));
                fs::write(&path, png).with_context(|| format!("Failed to write {}", path.display()))?;
                Ok(path)
            } else {
                let path = args.out_dir.join(format!("{}.csv", stem));
                let file = fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
                export::write_chart(&data, file)?;
                Ok(path)
            }
        });
        match written {
            Ok(path) => writeln!(handle, "ok\t{}\t{}", outcome.title, path.display()),
            Err(err) => {
                failures += 1;
                warn!(chart = %outcome.title, "chart not written");
                writeln!(handle, "error\t{}\t{:#}", outcome.title, err)
            }
        }
        .context("Failed to write summary to stdout")?;
    }
    handle.flush().context("Failed to flush stdout")?;
    info!(failures, "page done");
    Ok(())
}

fn run_chart(args: ChartArgs) -> Result<()> {
    let config = dashboard_config(&args.data);
    let spec = resolve_spec(
        &args.group,
        args.data.func.as_deref(),
        args.data.measure.as_deref(),
        args.date_name.as_deref(),
        args.sort.as_deref(),
    )
    .context("Invalid aggregation request")?;
    let filters = parse_filters(&args.data)?;

    let store = config.load_store().context("Failed to load dataset")?;
    let view = filter::apply(&store.table(), &filters);
    let table = aggregate(&view, &spec).context("Failed to aggregate")?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    let kind = match args.kind {
        ChartType::Table => return export::write_table(&table, handle),
        ChartType::Line => ChartKind::Line,
        ChartType::Histogram => ChartKind::Histogram,
        ChartType::World => ChartKind::Choropleth(MapScope::World { exclude_us: args.exclude_us }),
        ChartType::Usa => ChartKind::Choropleth(MapScope::UsState),
        ChartType::Treemap => ChartKind::Treemap {
            min_count: args.min_count,
            with_continent: table.dimension_index("Continent").is_some(),
            exclude_us: args.exclude_us,
        },
        ChartType::Heatmap => ChartKind::HeatmapMatrix,
        ChartType::Time => ChartKind::TimeHistogram { nbins: args.time_bins.clamp(1, MAX_TIME_BINS) },
    };
    let shaper = ChartShaper::new(config.state_codes().context("Failed to load state codes")?);
    let data = shaper.shape(&table, &kind).context("Failed to shape chart data")?;
    export::write_chart(&data, handle)
}

fn run_data(args: DataArgs) -> Result<()> {
    let config = dashboard_config(&args);
    let filters = parse_filters(&args)?;
    let store = config.load_store().context("Failed to load dataset")?;
    let view = filter::apply(&store.table(), &filters);
    info!(records = view.len(), skipped = store.skipped_rows(), "writing dataset");
    let stdout = io::stdout();
    export::write_records(&view, stdout.lock())
}

fn list_colours(path: Option<PathBuf>) -> Result<()> {
    let config = DashboardConfig { colours_path: path, ..DashboardConfig::default() };
    let resolver = config.theme_resolver().context("Failed to load colour list")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for name in resolver.allowed_colours() {
        writeln!(handle, "{}", name).context("Failed to write colour list")?;
    }
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}
