/*!
treescope-lib
=====

This crate provides the analysis engine of TreeScope, a tool to study the traffic of fat-tree interconnects, as a library. It holds the model of the tree, the port counters and the forwarding tables, and answers the queries of a front-end: aggregated traffic over a time range, routes between elements, routes among the nodes of jobs.

# Usage

This crate is `treescope-lib`. To use it add `treescope-lib` to your dependencies in your project's `Cargo.toml`.

```toml
[dependencies]
treescope-lib = "0.1"
```

Alternatively, the binary `treescope` runs the queries from a terminal. See [terminal_default_options] for its options.

# Datasets

A dataset is a directory with
* `network.topo`, the description of the tree, see [topology];
* counter files, see [counters];
* routing-table files, see [routing];
* optionally, a job log, see [jobs].

[Dataset::load](dataset::Dataset::load) reads all of it. The pieces may also be built separately:

```ignore
let topology = Topology::from_file(Path::new("network.topo"))?;
let mut store = CounterStore::new();
store.load_file(timestamp,Path::new("20170301-101500.count"))?;
let counters = store.fix();
let aggregation = counters.aggregate(&topology,None);
```

# Logging

The library logs through the `log` facade. Problems in the data, such as counters of unknown ports or jobs on unknown nodes, are warnings; they never stop the loading.

*/

pub mod error;
pub mod config;
pub mod topology;
pub mod counters;
pub mod routing;
pub mod jobs;
pub mod dataset;

use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use indicatif::ProgressBar;
use log::{info,warn};

pub use error::{Error,ErrorKind,SourceLocation};
pub use config::DatasetConfig;
pub use topology::{Topology,Element};
pub use counters::{CounterStore,FixedCounters,Aggregation};
pub use routing::{RoutingTableStore,RouteFinder,Route};
pub use jobs::Job;
pub use dataset::{Dataset,LoadReport};

///The time at which some data was dumped. Files carry no time zone.
pub type Timestamp = NaiveDateTime;
///A range of timestamps, both ends included.
pub type TimeRange = (Timestamp,Timestamp);

/// Get the number currently written in the Cargo.toml field `version`.
pub fn get_version_number() -> &'static str
{
	match option_env!("CARGO_PKG_VERSION")
	{
		Some( version ) => version,
		_ => "?",
	}
}

/// The default options to be used in a terminal application.
pub fn terminal_default_options() -> getopts::Options
{
	let mut opts = getopts::Options::new();
	opts.optopt("d","dataset","directory of the dataset","DIRECTORY");
	opts.optopt("c","config","JSON file with the configuration of the dataset","FILE");
	opts.optopt("y","year","year in which the jobs of the log were run","YEAR");
	opts.optopt("","from","first timestamp of the range to aggregate","YYYYmmdd-HHMMSS");
	opts.optopt("","to","last timestamp of the range to aggregate","YYYYmmdd-HHMMSS");
	opts.optopt("t","table","timestamp of the routing table to use","YYYYmmdd-HHMMSS");
	opts.optmulti("j","job","route among the nodes of the job. May be repeated","JOBID");
	opts.optflag("s","summary","print the time summary of the counters as CSV");
	opts.optflag("","redundant","drop routing tables equal to the previous one");
	opts.optflag("q","quiet","only show warnings and errors");
	opts.optflag("h","help","show this help");
	opts.optflag("v","version","show the version");
	opts
}

fn parse_timestamp(text:&str, config:&DatasetConfig) -> Result<Timestamp,Error>
{
	NaiveDateTime::parse_from_str(text,&config.timestamp_format).map_err(|e|error!(bad_argument).with_message(format!("'{}' is not a timestamp: {}",text,e)))
}

///Ask the year of the jobs through the terminal.
fn prompt_job_year() -> Option<i32>
{
	let reply = rprompt::prompt_reply_stdout("The job log has timestamps without the year. Please enter the year for which the jobs were run: ").ok()?;
	match reply.trim().parse()
	{
		Ok(year) => Some(year),
		Err(_) =>
		{
			warn!("Invalid year '{}'. Skipping job loading.",reply.trim());
			None
		},
	}
}

/// Run the terminal application with the given command line arguments.
pub fn terminal_main(args:&[String]) -> Result<(),Error>
{
	let opts = terminal_default_options();
	let option_matches = opts.parse(args.get(1..).unwrap_or(&[])).map_err(|e|error!(bad_argument).with_message(e.to_string()))?;
	if option_matches.opt_present("help")
	{
		let brief = format!("Usage: {} --dataset DIRECTORY [options]",args.get(0).map(String::as_str).unwrap_or("treescope"));
		print!("{}",opts.usage(&brief));
		return Ok(());
	}
	if option_matches.opt_present("version")
	{
		println!("treescope {}",get_version_number());
		return Ok(());
	}
	let level = if option_matches.opt_present("quiet") { "warn" } else { "info" };
	//A logger may already be installed by an embedding application.
	let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();

	let mut config = match option_matches.opt_str("config")
	{
		Some(path) => DatasetConfig::from_file(Path::new(&path))?,
		None => DatasetConfig::default(),
	};
	if let Some(directory) = option_matches.opt_str("dataset")
	{
		config.directory = directory.into();
	}
	if config.directory.as_os_str().is_empty()
	{
		return Err(error!(bad_argument).with_message("a dataset directory is required (--dataset)".to_string()));
	}
	if let Some(year) = option_matches.opt_str("year")
	{
		config.job_year = Some(year.parse().map_err(|_|error!(bad_argument).with_message(format!("'{}' is not a year",year)))?);
	}
	else if config.job_year.is_none() && config.jobs_path().is_file()
	{
		config.job_year = prompt_job_year();
	}
	if option_matches.opt_present("redundant")
	{
		config.remove_redundant_tables = true;
	}
	let job_ids = option_matches.opt_strs("job").iter().map(|id|id.parse().map_err(|_|error!(bad_argument).with_message(format!("'{}' is not a job id",id)))).collect::<Result<Vec<jobs::JobId>,Error>>()?;
	let from = option_matches.opt_str("from").map(|text|parse_timestamp(&text,&config)).transpose()?;
	let to = option_matches.opt_str("to").map(|text|parse_timestamp(&text,&config)).transpose()?;

	let progress = if option_matches.opt_present("quiet") { ProgressBar::hidden() } else { ProgressBar::new(0) };
	let (dataset,report) = Dataset::load_with_progress(&config,progress)?;
	for failure in report.failures.iter()
	{
		warn!("{}: {}",failure.path.display(),failure.error);
	}
	if let Some(table) = option_matches.opt_str("table")
	{
		dataset.select_routing_table(&parse_timestamp(&table,&config)?)?;
	}

	let mut range = match (from,to,dataset.counters().range())
	{
		(None,None,_) => None,
		(from,to,Some((first,last))) => Some((from.unwrap_or(first),to.unwrap_or(last))),
		(_,_,None) => None,
	};
	if !job_ids.is_empty()
	{
		let window = dataset.jobs_time_window(&job_ids)?;
		info!("The jobs ran together from {} to {}.",window.0,window.1);
		if range.is_none()
		{
			range = Some(window);
		}
		let batch = dataset.routes_for_jobs(&job_ids)?;
		println!("jobs {:?}: {} destinations, {} elements, {} shared links, {} failed routes",job_ids,batch.route.dlids.len(),batch.route.nodes.len(),batch.route.links.len(),batch.failures.len());
		println!("links: {}",batch.route.links.iter().map(|link|link.to_string()).collect::<Vec<_>>().join(" "));
	}

	let aggregation = dataset.aggregate(range);
	println!("aggregated {} timestamps: {} links with {} total traffic, {} elements, {} unresolved ports",aggregation.num_timestamps,aggregation.links.len(),aggregation.total(),aggregation.switches.len(),aggregation.unresolved.len());
	let mut busiest: Vec<_> = aggregation.links.iter().collect();
	busiest.sort_by(|a,b|b.rcv_data.partial_cmp(&a.rcv_data).unwrap_or(std::cmp::Ordering::Equal));
	for link in busiest.iter().take(10)
	{
		println!("{:>8} {} port {} -> {} : {}",link.link_type.to_string(),link.nodefrom,link.port_idx,link.nodeto,link.rcv_data);
	}

	if option_matches.opt_present("summary")
	{
		write_time_summary(&dataset,std::io::stdout())?;
	}
	Ok(())
}

///Write the time summary as CSV, a row per timestamp and a column per series.
pub fn write_time_summary<W:Write>(dataset:&Dataset, output:W) -> Result<(),Error>
{
	let summary = dataset.time_summary();
	let mut writer = csv::Writer::from_writer(output);
	let to_error = |e:csv::Error|error!(undetermined).with_message(format!("could not write the summary: {}",e));
	let mut header = vec!["timestamp".to_string()];
	header.extend(summary.series.iter().map(|series|series.to_string()));
	writer.write_record(&header).map_err(to_error)?;
	for (index,timestamp) in summary.timestamps.iter().enumerate()
	{
		let mut row = vec![timestamp.to_string()];
		row.extend(summary.series.iter().map(|series|series.values[index].map(|value|value.to_string()).unwrap_or_default()));
		writer.write_record(&row).map_err(to_error)?;
	}
	writer.flush().map_err(|e|error!(undetermined).with_message(e.to_string()))?;
	Ok(())
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn terminal_requires_a_dataset()
	{
		let error = terminal_main(&[]).expect_err("no dataset was given");
		assert!(matches!(error.kind,ErrorKind::BadArgument));
		let args = vec!["treescope".to_string(),"--year".to_string(),"2017".to_string()];
		assert!(matches!(terminal_main(&args).map_err(|e|e.kind),Err(ErrorKind::BadArgument)));
		let version = vec!["treescope".to_string(),"--version".to_string()];
		assert!(terminal_main(&version).is_ok());
	}
}
