/*!

Jobs of the scheduler log and where they ran in the tree.

The log has a line per job with the columns `JOBID PARTITION NAME USER STATE START DURATION NCOUNT NODELIST`, as in
```text
 123456   pbatch  sim-1.2  alice  CD 03/01-10:15:00  1:02:03  4 cab[100-102,110]
```
* `START` has no year, which must be given when parsing.
* `DURATION` is `[[hours:]minutes:]seconds`.
* `NODELIST` is a prefix followed either by a number or by a bracketed list of numbers and ranges.

Lines not following this shape are ignored.

After parsing, [resolve_job_topology] finds the compute nodes of each job in the [Topology] and the level-1 switches they hang from.

*/

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::{Duration,NaiveDateTime};
use log::{info,warn};
use regex::Regex;

use crate::TimeRange;
use crate::error;
use crate::error::Error;
use crate::topology::{Topology,NodeId};

pub type JobId = u64;

///A level-1 switch used by a job and how many of the job nodes hang from it.
#[derive(Debug,Clone,PartialEq,Eq)]
pub struct SwitchCount
{
	pub id: NodeId,
	pub count: usize,
}

#[derive(Debug,Clone,PartialEq)]
pub struct Job
{
	pub id: JobId,
	pub partition: String,
	pub name: String,
	pub user: String,
	pub state: String,
	pub start: NaiveDateTime,
	pub end: NaiveDateTime,
	pub duration: Duration,
	///The count of nodes as written in the log.
	pub node_count: usize,
	///Node names after expanding the node list.
	pub node_names: Vec<String>,
	///Ids of the nodes found in the topology. Filled by [resolve_job_topology].
	pub nodes: Vec<NodeId>,
	///Level-1 switches of the nodes, sorted by id. Filled by [resolve_job_topology].
	pub leaf_switches: Vec<SwitchCount>,
}

impl Job
{
	pub fn time_range(&self) -> TimeRange
	{
		(self.start,self.end)
	}
}

const JOB_LINE: &str = r"\b(\d+) +(\w+) +([\w.-]+) +(\w+) +(\w+) ([\d/\-:]+) +([\d:]+) +(\d+) +(\w+)(.+)";

///Seconds of a `[[h:]m:]s` duration. `None` when malformed or too long to be represented.
pub fn parse_duration(text:&str) -> Option<Duration>
{
	let mut seconds: i64 = 0;
	for field in text.split(':')
	{
		let value: i64 = field.parse().ok()?;
		seconds = seconds.checked_mul(60)?.checked_add(value)?;
	}
	Duration::try_seconds(seconds)
}

/**
Expand a node list such as `[100-102,110]` after `prefix`. Brackets are optional.
Numbers are written without padding, so `n[08-10]` is `n8`, `n9` and `n10`.
At most `limit` names are produced; the rest of the list is dropped with a warning.
**/
pub fn expand_nodelist(prefix:&str, list:&str, limit:usize) -> Vec<String>
{
	let list = list.trim();
	let list = list.strip_prefix('[').and_then(|inner|inner.strip_suffix(']')).unwrap_or(list);
	let mut names = vec![];
	for item in list.split(',')
	{
		let bounds: Vec<&str> = item.trim().split('-').collect();
		let numbers: Option<Vec<u64>> = bounds.iter().map(|bound|bound.parse().ok()).collect();
		let (low,high) = match numbers.as_deref()
		{
			Some([single]) => (*single,*single),
			Some([low,high]) => (*low,*high),
			_ =>
			{
				warn!("cannot expand '{}' of node list {}{}",item,prefix,list);
				continue;
			},
		};
		let room = limit - names.len();
		names.extend((low..=high).take(room).map(|number|format!("{}{}",prefix,number)));
		if high>=low && (high-low) as u128 + 1 > room as u128
		{
			warn!("node list {}{} has more than {} names; the rest are dropped.",prefix,list,limit);
			break;
		}
	}
	names
}

/**
Parse the scheduler log. `year` completes the start of every job.
Jobs whose expanded node list does not have the announced count are kept, with a warning.
**/
pub fn parse_jobs<R:BufRead>(reader:R, year:i32) -> Result<Vec<Job>,Error>
{
	let pattern = Regex::new(JOB_LINE).map_err(|e|error!(undetermined).with_message(e.to_string()))?;
	let mut jobs = vec![];
	for (index,line) in reader.lines().enumerate()
	{
		let line = line.map_err(|e|error!(could_not_parse_file,None,Some(index+1)).with_message(e.to_string()))?;
		let captures = match pattern.captures(line.trim_end())
		{
			Some(captures) => captures,
			None => continue,
		};
		let field = |i:usize| captures.get(i).map(|m|m.as_str()).unwrap_or("");
		let start = match NaiveDateTime::parse_from_str(&format!("{}/{}",year,field(6)),"%Y/%m/%d-%H:%M:%S")
		{
			Ok(start) => start,
			Err(e) =>
			{
				warn!("line {} of the job log has a bad start time '{}': {}",index+1,field(6),e);
				continue;
			},
		};
		let (duration,id,node_count) = match (parse_duration(field(7)),field(1).parse::<JobId>(),field(8).parse::<usize>())
		{
			(Some(duration),Ok(id),Ok(node_count)) => (duration,id,node_count),
			_ =>
			{
				warn!("line {} of the job log has bad numbers: {}",index+1,line);
				continue;
			},
		};
		let end = match start.checked_add_signed(duration)
		{
			Some(end) => end,
			None =>
			{
				warn!("line {} of the job log ends out of the calendar: {}",index+1,line);
				continue;
			},
		};
		let node_names = expand_nodelist(field(9),field(10),node_count);
		if node_names.len() != node_count
		{
			warn!("job {} lists {} nodes but announces {}: {}{}",id,node_names.len(),node_count,field(9),field(10));
		}
		jobs.push(Job{
			id,
			partition: field(2).to_string(),
			name: field(3).to_string(),
			user: field(4).to_string(),
			state: field(5).to_string(),
			start,
			end,
			duration,
			node_count,
			node_names,
			nodes: vec![],
			leaf_switches: vec![],
		});
	}
	info!("Parsed {} jobs.",jobs.len());
	Ok(jobs)
}

///Fill `nodes` and `leaf_switches` of every job. Names not in the topology are dropped.
pub fn resolve_job_topology(topology:&Topology, jobs:&mut [Job])
{
	let mut dropped = 0;
	for job in jobs.iter_mut()
	{
		let nodes: Vec<_> = job.node_names.iter().filter_map(|name|topology.node_by_name(name)).collect();
		dropped += job.node_names.len() - nodes.len();
		let mut leaves: BTreeMap<&str,usize> = BTreeMap::new();
		for node in nodes.iter()
		{
			if let Some(leaf) = node.uplink().and_then(|port|port.dest_node.as_deref())
			{
				*leaves.entry(leaf).or_insert(0) += 1;
			}
		}
		job.nodes = nodes.iter().map(|node|node.id.clone()).collect();
		job.leaf_switches = leaves.into_iter().map(|(id,count)|SwitchCount{ id:id.to_string(), count }).collect();
		if job.nodes.len() != job.node_count
		{
			warn!("job {} has {} nodes in the topology but announces {}.",job.id,job.nodes.len(),job.node_count);
		}
	}
	if dropped>0
	{
		warn!("{} node names of jobs are not in the topology.",dropped);
	}
}

pub fn find_job(jobs:&[Job], id:JobId) -> Option<&Job>
{
	jobs.iter().find(|job|job.id==id)
}

///The time during which all the jobs were running.
pub fn time_window<'a,I:IntoIterator<Item=&'a Job>>(jobs:I) -> Result<TimeRange,Error>
{
	let mut window: Option<TimeRange> = None;
	for job in jobs
	{
		window = Some(match window
		{
			None => job.time_range(),
			Some((lo,hi)) =>
			{
				let (lo,hi) = (lo.max(job.start),hi.min(job.end));
				if lo >= hi
				{
					return Err(error!(no_shared_time_window).with_message(format!("job {} does not overlap the previous ones",job.id)));
				}
				(lo,hi)
			},
		});
	}
	window.ok_or_else(||error!(bad_argument).with_message("no jobs were given".to_string()))
}

///Compute nodes and level-1 switches used by every one of the jobs.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct SharedNodes
{
	pub l0: Vec<NodeId>,
	pub l1: Vec<NodeId>,
}

pub fn shared_nodes<'a,I:IntoIterator<Item=&'a Job>>(jobs:I) -> SharedNodes
{
	let mut shared: Option<SharedNodes> = None;
	for job in jobs
	{
		shared = Some(match shared
		{
			None =>
			{
				let mut l0 = job.nodes.clone();
				l0.sort();
				l0.dedup();
				SharedNodes{ l0, l1:job.leaf_switches.iter().map(|leaf|leaf.id.clone()).collect() }
			},
			Some(SharedNodes{mut l0,mut l1}) =>
			{
				l0.retain(|id|job.nodes.contains(id));
				l1.retain(|id|job.leaf_switches.iter().any(|leaf|&leaf.id==id));
				SharedNodes{ l0, l1 }
			},
		});
	}
	shared.unwrap_or_default()
}

///Conditions for a job to be shown.
#[derive(Debug,Clone,Default,PartialEq)]
pub struct JobFilter
{
	pub min_nodes: Option<usize>,
	pub min_duration: Option<Duration>,
	///The job must be running at some point of this range.
	pub window: Option<TimeRange>,
}

impl JobFilter
{
	pub fn accepts(&self, job:&Job) -> bool
	{
		self.min_nodes.map_or(true,|min|job.node_count>=min)
			&& self.min_duration.map_or(true,|min|job.duration>=min)
			&& self.window.map_or(true,|(lo,hi)|job.start<=hi && job.end>=lo)
	}
	pub fn apply<'a>(&self, jobs:&'a [Job]) -> Vec<&'a Job>
	{
		jobs.iter().filter(|job|self.accepts(job)).collect()
	}
}
