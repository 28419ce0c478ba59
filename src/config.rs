/*!
Configuration of a dataset session.

A dataset is a directory with the topology, counter files, routing-table files and optionally a job log. The names used inside the directory can be changed through a JSON file such as
```json
{
	"directory": "/data/cab-2017-03",
	"job_year": 2017,
	"remove_redundant_tables": true
}
```
Any field not given takes its default. The command line options of the terminal front-end are applied over this.
*/

use std::fs::File;
use std::io::{BufReader,Read};
use std::path::{Path,PathBuf};

use serde::{Deserialize,Serialize};

use crate::error;
use crate::error::Error;
use crate::topology::preprocess::FatTreeShape;

fn default_listing() -> String { "listing.txt".to_string() }
fn default_topology() -> String { "network.topo".to_string() }
fn default_jobs() -> String { "slurmqlog/sqlog.txt".to_string() }
fn default_counter_extension() -> String { "count".to_string() }
fn default_table_extension() -> String { "rtable".to_string() }
fn default_timestamp_format() -> String { "%Y%m%d-%H%M%S".to_string() }

#[derive(Debug,Clone,PartialEq,Serialize,Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig
{
	///The directory of the dataset. Every other path is relative to it.
	#[serde(default)]
	pub directory: PathBuf,
	///A file listing the data files, one per line. When missing the directory entries are used.
	#[serde(default="default_listing")]
	pub listing: String,
	#[serde(default="default_topology")]
	pub topology: String,
	#[serde(default="default_jobs")]
	pub jobs: String,
	#[serde(default="default_counter_extension")]
	pub counter_extension: String,
	#[serde(default="default_table_extension")]
	pub table_extension: String,
	///Format of the stem of data files.
	#[serde(default="default_timestamp_format")]
	pub timestamp_format: String,
	///The job log lacks the year. Jobs are only loaded when it is known.
	#[serde(default)]
	pub job_year: Option<i32>,
	///Drop routing tables equal to the previous one after loading.
	#[serde(default)]
	pub remove_redundant_tables: bool,
	///When given, the topology is a raw dump whose levels, pods, cores and positions must be computed with this shape.
	#[serde(default)]
	pub fat_tree_shape: Option<FatTreeShape>,
}

impl Default for DatasetConfig
{
	fn default() -> DatasetConfig
	{
		DatasetConfig{
			directory: PathBuf::new(),
			listing: default_listing(),
			topology: default_topology(),
			jobs: default_jobs(),
			counter_extension: default_counter_extension(),
			table_extension: default_table_extension(),
			timestamp_format: default_timestamp_format(),
			job_year: None,
			remove_redundant_tables: false,
			fat_tree_shape: None,
		}
	}
}

impl DatasetConfig
{
	///The default layout for the dataset at `directory`.
	pub fn new<P:AsRef<Path>>(directory:P) -> DatasetConfig
	{
		DatasetConfig{ directory:directory.as_ref().to_path_buf(), ..DatasetConfig::default() }
	}
	pub fn from_reader<R:Read>(reader:R) -> Result<DatasetConfig,Error>
	{
		serde_json::from_reader(reader).map_err(|e|error!(could_not_parse_file,None,Some(e.line())).with_message(e.to_string()))
	}
	pub fn from_file(path:&Path) -> Result<DatasetConfig,Error>
	{
		let file = File::open(path).map_err(|err|error!(could_not_open_file,path.to_path_buf(),err))?;
		DatasetConfig::from_reader(BufReader::new(file)).map_err(|e|e.with_file(path.to_path_buf()))
	}
	pub fn listing_path(&self) -> PathBuf
	{
		self.directory.join(&self.listing)
	}
	pub fn topology_path(&self) -> PathBuf
	{
		self.directory.join(&self.topology)
	}
	pub fn jobs_path(&self) -> PathBuf
	{
		self.directory.join(&self.jobs)
	}
}
