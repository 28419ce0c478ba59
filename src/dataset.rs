/*!

A dataset directory loaded into memory.

The directory holds
* the topology, `network.topo`, loaded first since everything else refers to it;
* counter files `YYYYmmdd-HHMMSS.count` and routing-table files `YYYYmmdd-HHMMSS.rtable`, loaded concurrently;
* optionally the job log `slurmqlog/sqlog.txt`, whose timestamps lack the year.

The data files are those named in `listing.txt` or, if there is no such file, all the entries of the directory. See [DatasetConfig] to change these names.

A file that cannot be loaded is recorded in the [LoadReport] and the rest of the files are loaded anyway. Only failing to load the topology is fatal.

*/

use std::fs::{self,File};
use std::io::BufReader;
use std::path::{Path,PathBuf};
use std::sync::atomic::{AtomicUsize,Ordering};
use std::thread;

use chrono::NaiveDateTime;
use indicatif::{ProgressBar,ProgressStyle};
use log::{info,warn};

use crate::{Timestamp,TimeRange};
use crate::config::DatasetConfig;
use crate::counters::{self,CounterStore,CounterRecord,FixedCounters,Aggregation,TimeSummary};
use crate::error;
use crate::error::Error;
use crate::jobs::{self,Job,JobId};
use crate::routing::{RoutingTable,RoutingTableStore,RouteFinder,RouteBatch};
use crate::topology::{Topology,TopologyData};
use crate::topology::preprocess::{preprocess,PreprocessReport};

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum FileKind
{
	Counters,
	RoutingTable,
}

///A data file of the directory.
#[derive(Debug,Clone,PartialEq,Eq)]
pub struct DataFile
{
	pub kind: FileKind,
	pub timestamp: Timestamp,
	pub path: PathBuf,
}

///Classify a file by its extension and read the timestamp from its stem.
pub fn parse_file_name(name:&str, config:&DatasetConfig) -> Option<(FileKind,Timestamp)>
{
	let file_name = Path::new(name).file_name()?.to_str()?;
	let (stem,extension) = file_name.split_once('.')?;
	let kind = if extension==config.counter_extension
	{
		FileKind::Counters
	}
	else if extension==config.table_extension
	{
		FileKind::RoutingTable
	}
	else
	{
		return None;
	};
	let timestamp = NaiveDateTime::parse_from_str(stem,&config.timestamp_format).ok()?;
	Some((kind,timestamp))
}

///Names of the files in the dataset, from the listing or else from the directory.
fn list_files(config:&DatasetConfig) -> Result<Vec<String>,Error>
{
	let listing = config.listing_path();
	if listing.is_file()
	{
		let text = fs::read_to_string(&listing).map_err(|err|error!(could_not_open_file,listing.clone(),err))?;
		return Ok(text.lines().map(str::trim).filter(|line|!line.is_empty()).map(str::to_string).collect());
	}
	let entries = fs::read_dir(&config.directory).map_err(|err|error!(could_not_open_file,config.directory.clone(),err))?;
	let mut names = vec![];
	for entry in entries
	{
		let entry = entry.map_err(|err|error!(could_not_open_file,config.directory.clone(),err))?;
		if let Some(name) = entry.file_name().to_str()
		{
			names.push(name.to_string());
		}
	}
	names.sort();
	Ok(names)
}

///A file that could not be loaded.
#[derive(Debug)]
pub struct LoadFailure
{
	pub path: PathBuf,
	pub error: Error,
}

///What happened while loading a dataset.
#[derive(Debug,Default)]
pub struct LoadReport
{
	pub counter_files: usize,
	pub table_files: usize,
	///Listed files that are not data files.
	pub ignored: Vec<String>,
	pub failures: Vec<LoadFailure>,
	///Ports whose far end does not point back to them.
	pub inconsistent_ports: usize,
	pub preprocess: Option<PreprocessReport>,
	pub redundant_tables: usize,
	pub jobs: usize,
}

enum Loaded
{
	Counters(Vec<CounterRecord>),
	Table(RoutingTable),
}

fn load_data_file(file:&DataFile) -> Result<Loaded,Error>
{
	match file.kind
	{
		FileKind::Counters =>
		{
			let handle = File::open(&file.path).map_err(|err|error!(could_not_open_file,file.path.clone(),err))?;
			let records = counters::parse_counters(BufReader::new(handle)).map_err(|e|e.with_file(file.path.clone()))?;
			Ok(Loaded::Counters(records))
		},
		FileKind::RoutingTable => Ok(Loaded::Table(RoutingTable::from_file(&file.path)?)),
	}
}

/**
Load every file in its own task, using as many threads as the machine offers.
Returns when all of them are done, with the results in the order of `files`.
**/
fn load_concurrently(files:&[DataFile], progress:&ProgressBar) -> Vec<Result<Loaded,Error>>
{
	let workers = thread::available_parallelism().map(|n|n.get()).unwrap_or(1).min(files.len().max(1));
	let next = AtomicUsize::new(0);
	let mut results: Vec<Option<Result<Loaded,Error>>> = (0..files.len()).map(|_|None).collect();
	thread::scope(|scope|{
		let handles: Vec<_> = (0..workers).map(|_|scope.spawn(||{
			let mut done = vec![];
			loop
			{
				let index = next.fetch_add(1,Ordering::Relaxed);
				if index >= files.len()
				{
					break;
				}
				done.push((index,load_data_file(&files[index])));
				progress.inc(1);
			}
			done
		})).collect();
		for handle in handles
		{
			match handle.join()
			{
				Ok(done) => for (index,result) in done
				{
					results[index] = Some(result);
				},
				Err(_) => warn!("a loading thread panicked."),
			}
		}
	});
	results.into_iter().map(|result|result.unwrap_or_else(||Err(error!(undetermined).with_message("the file was not loaded".to_string())))).collect()
}

#[derive(Debug)]
pub struct Dataset
{
	config: DatasetConfig,
	topology: Topology,
	counters: FixedCounters,
	tables: RoutingTableStore,
	jobs: Vec<Job>,
}

impl Dataset
{
	pub fn load(config:&DatasetConfig) -> Result<(Dataset,LoadReport),Error>
	{
		Dataset::load_with_progress(config,ProgressBar::hidden())
	}
	///Load showing the progress over the data files in `progress`.
	pub fn load_with_progress(config:&DatasetConfig, progress:ProgressBar) -> Result<(Dataset,LoadReport),Error>
	{
		let mut report = LoadReport::default();
		let topology_path = config.topology_path();
		let topology = match &config.fat_tree_shape
		{
			Some(shape) =>
			{
				let mut data = TopologyData::from_file(&topology_path)?;
				report.preprocess = Some(preprocess(&mut data,shape));
				Topology::load(data)?
			},
			None => Topology::from_file(&topology_path)?,
		};
		report.inconsistent_ports = topology.check_consistency();

		let mut files = vec![];
		for name in list_files(config)?
		{
			match parse_file_name(&name,config)
			{
				Some((kind,timestamp)) => files.push(DataFile{ kind, timestamp, path:config.directory.join(&name) }),
				None => report.ignored.push(name),
			}
		}
		info!("Loading {} data files from {}.",files.len(),config.directory.display());
		progress.set_length(files.len() as u64);
		progress.set_style(ProgressStyle::default_bar().template("{prefix} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}"));
		progress.set_prefix("loading");

		let mut store = CounterStore::new();
		let mut tables = RoutingTableStore::new();
		for (file,result) in files.iter().zip(load_concurrently(&files,&progress))
		{
			match result
			{
				Ok(Loaded::Counters(records)) =>
				{
					store.insert(file.timestamp,records);
					report.counter_files += 1;
				},
				Ok(Loaded::Table(table)) =>
				{
					tables.insert(file.timestamp,table);
					report.table_files += 1;
				},
				Err(error) =>
				{
					warn!("could not load {}: {}",file.path.display(),error);
					report.failures.push(LoadFailure{ path:file.path.clone(), error });
				},
			}
		}
		progress.finish_and_clear();
		let counters = store.fix();

		if config.remove_redundant_tables
		{
			report.redundant_tables = tables.remove_redundant();
		}
		let oldest = tables.timestamps().next().copied();
		match oldest
		{
			Some(timestamp) => tables.select_active(&timestamp)?,
			None => warn!("the dataset has no routing tables."),
		}

		let mut job_list = vec![];
		if let Some(year) = config.job_year
		{
			let path = config.jobs_path();
			let parsed = File::open(&path)
				.map_err(|err|error!(could_not_open_file,path.clone(),err))
				.and_then(|file|jobs::parse_jobs(BufReader::new(file),year).map_err(|e|e.with_file(path.clone())));
			match parsed
			{
				Ok(mut list) =>
				{
					jobs::resolve_job_topology(&topology,&mut list);
					job_list = list;
				},
				Err(error) =>
				{
					warn!("could not load the jobs: {}",error);
					report.failures.push(LoadFailure{ path, error });
				},
			}
		}
		report.jobs = job_list.len();
		info!("Loaded {} counter files, {} routing tables and {} jobs; {} files failed.",report.counter_files,report.table_files,report.jobs,report.failures.len());
		let dataset = Dataset{ config:config.clone(), topology, counters, tables, jobs:job_list };
		Ok((dataset,report))
	}
	pub fn config(&self) -> &DatasetConfig
	{
		&self.config
	}
	pub fn topology(&self) -> &Topology
	{
		&self.topology
	}
	pub fn counters(&self) -> &FixedCounters
	{
		&self.counters
	}
	pub fn tables(&self) -> &RoutingTableStore
	{
		&self.tables
	}
	pub fn jobs(&self) -> &[Job]
	{
		&self.jobs
	}
	///Sum the counters in `range`, or along all the timestamps when `None`.
	pub fn aggregate(&self, range:Option<TimeRange>) -> Aggregation<'_>
	{
		self.counters.aggregate(&self.topology,range)
	}
	pub fn time_summary(&self) -> TimeSummary
	{
		counters::time_summary(&self.counters,&self.topology)
	}
	pub fn select_routing_table(&self, timestamp:&Timestamp) -> Result<(),Error>
	{
		self.tables.select_active(timestamp)
	}
	///A finder over the currently active routing table.
	pub fn route_finder(&self) -> Result<RouteFinder<'_>,Error>
	{
		RouteFinder::from_store(&self.topology,&self.tables)
	}
	fn jobs_by_id(&self, ids:&[JobId]) -> Result<Vec<&Job>,Error>
	{
		ids.iter().map(|&id|jobs::find_job(&self.jobs,id).ok_or_else(||error!(bad_argument).with_message(format!("there is no job {}",id)))).collect()
	}
	///The time in which all the given jobs were running.
	pub fn jobs_time_window(&self, ids:&[JobId]) -> Result<TimeRange,Error>
	{
		jobs::time_window(self.jobs_by_id(ids)?)
	}
	pub fn routes_for_jobs(&self, ids:&[JobId]) -> Result<RouteBatch,Error>
	{
		let selected: Vec<Job> = self.jobs_by_id(ids)?.into_iter().cloned().collect();
		Ok(self.route_finder()?.routes_for_jobs(&selected))
	}
}
