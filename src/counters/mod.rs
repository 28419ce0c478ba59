/*!

Port counters over time.

Each counter file is a table with a row per port and time at which it was dumped. Rows carry at least the columns `node_id`, `port_idx` and `rcv_data`; every column except `node_id` must be numeric. The `rcv_data` values are cumulative as read from the hardware.

The life of the counters is:
1. [CounterStore::load] or [CounterStore::insert] each table, in any order.
2. [CounterStore::fix] turns cumulative values into the increase since the previous timestamp. It consumes the store, so it happens once and after all the loads.
3. [FixedCounters::aggregate] sums the increases over a time range and resolves them against the [Topology] into links and per-element summaries.

A counter whose value decreases, as when the port is reset, gives an increase of 0. The traffic of that interval is lost.

*/

pub mod summary;

use std::cmp::Ordering;
use std::collections::{BTreeMap,HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader,Read};
use std::path::Path;

use log::{debug,info,warn};

use crate::{Timestamp,TimeRange};
use crate::error;
use crate::error::Error;
use crate::topology::{Topology,Element,Port,NodeId,PortIndex};

pub use self::summary::{time_summary,TimeSummary};

///A row of a counter file.
#[derive(Debug,Clone,PartialEq)]
pub struct CounterRecord
{
	pub node_id: NodeId,
	pub port_idx: PortIndex,
	///Raw cumulative value after loading. The increase since the previous timestamp after fixing.
	pub rcv_data: f64,
}

///Parse a counter table in CSV format with header.
///Rows with non-numeric values are skipped with a warning.
pub fn parse_counters<R:Read>(reader:R) -> Result<Vec<CounterRecord>,Error>
{
	let mut csv_reader = csv::ReaderBuilder::new()
		.has_headers(true)
		.flexible(true)
		.trim(csv::Trim::All)
		.from_reader(reader);
	let headers = csv_reader.headers().map_err(|e|error!(could_not_parse_file,None,Some(1)).with_message(e.to_string()))?.clone();
	let column = |name:&str| headers.iter().position(|header|header==name)
		.ok_or_else(||error!(could_not_parse_file,None,Some(1)).with_message(format!("missing column {}",name)));
	let node_column = column("node_id")?;
	let port_column = column("port_idx")?;
	let data_column = column("rcv_data")?;
	let mut records = vec![];
	let mut skipped = 0;
	for row in csv_reader.records()
	{
		let row = row.map_err(|e|{
			let line = e.position().map(|p|p.line() as usize);
			error!(could_not_parse_file,None,line).with_message(e.to_string())
		})?;
		let mut numeric = true;
		let mut port_idx = None;
		let mut rcv_data = None;
		for (index,field) in row.iter().enumerate()
		{
			if index==node_column
			{
				continue;
			}
			match field.parse::<f64>()
			{
				Ok(value) =>
				{
					if index==port_column { port_idx=Some(value) }
					if index==data_column { rcv_data=Some(value) }
				},
				Err(_) => numeric=false,
			}
		}
		match (numeric,row.get(node_column),port_idx,rcv_data)
		{
			(true,Some(node_id),Some(port_idx),Some(rcv_data)) if port_idx>=0.0 && port_idx.fract()==0.0 =>
			{
				records.push(CounterRecord{ node_id:node_id.to_string(), port_idx:port_idx as PortIndex, rcv_data });
			},
			_ =>
			{
				skipped += 1;
				debug!("skipping counter row {:?}",row);
			},
		}
	}
	if skipped>0
	{
		warn!("{} counter rows were not numeric and have been skipped.",skipped);
	}
	Ok(records)
}

///Counter tables as they are loaded, with cumulative values.
#[derive(Debug,Default)]
pub struct CounterStore
{
	tables: BTreeMap<Timestamp,Vec<CounterRecord>>,
}

impl CounterStore
{
	pub fn new() -> CounterStore
	{
		CounterStore::default()
	}
	///Store the table of a timestamp. A previous table of the same timestamp is replaced.
	pub fn insert(&mut self, timestamp:Timestamp, records:Vec<CounterRecord>)
	{
		if self.tables.insert(timestamp,records).is_some()
		{
			warn!("counters for {} were loaded twice; keeping the last ones.",timestamp);
		}
	}
	///Parse and store a table. Returns the number of records.
	pub fn load<R:Read>(&mut self, timestamp:Timestamp, reader:R) -> Result<usize,Error>
	{
		let records = parse_counters(reader)?;
		let amount = records.len();
		self.insert(timestamp,records);
		Ok(amount)
	}
	pub fn load_file(&mut self, timestamp:Timestamp, path:&Path) -> Result<usize,Error>
	{
		let file = File::open(path).map_err(|err|error!(could_not_open_file,path.to_path_buf(),err))?;
		self.load(timestamp,BufReader::new(file)).map_err(|e|e.with_file(path.to_path_buf()))
	}
	pub fn len(&self) -> usize
	{
		self.tables.len()
	}
	pub fn is_empty(&self) -> bool
	{
		self.tables.is_empty()
	}
	pub fn timestamps(&self) -> impl Iterator<Item=&Timestamp>
	{
		self.tables.keys()
	}
	/**
	Replace every cumulative value with its increase since the previous timestamp of the same `(node_id,port_idx)`.
	The first observation of each port becomes 0 and negative increases are clamped to 0.
	**/
	pub fn fix(self) -> FixedCounters
	{
		info!("Fixing {} counter tables.",self.tables.len());
		let mut tables = self.tables;
		let mut previous: HashMap<(NodeId,PortIndex),f64> = HashMap::new();
		for records in tables.values_mut()
		{
			for record in records.iter_mut()
			{
				let value = record.rcv_data;
				let key = (record.node_id.clone(),record.port_idx);
				let delta = match previous.get(&key)
				{
					Some(last) => value - last,
					None => 0.0,
				};
				record.rcv_data = if delta<0.0 { 0.0 } else { delta };
				previous.insert(key,value);
			}
		}
		FixedCounters{ tables }
	}
}

///Direction of a link. The order is the one used to sort links.
#[derive(Debug,Clone,Copy,PartialEq,Eq,PartialOrd,Ord,Hash)]
pub enum LinkType
{
	Down,
	Unknown,
	Up,
}

impl LinkType
{
	pub fn between(from:&Element, to:&Element) -> LinkType
	{
		if from.level() < to.level() { LinkType::Up } else { LinkType::Down }
	}
}

impl fmt::Display for LinkType
{
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result
	{
		let name = match self
		{
			LinkType::Down => "down",
			LinkType::Unknown => "unknown",
			LinkType::Up => "up",
		};
		write!(f,"{}",name)
	}
}

///Why a `(node_id,port_idx)` could not become a link.
#[derive(Debug,Clone,PartialEq,Eq)]
pub enum UnresolvedReason
{
	///There is no node or switch with that id.
	UnknownSource,
	///The element has no port with that index.
	MissingPort,
	///The port has no destination.
	BrokenLink,
	///The destination does not exist in the topology.
	UnknownDestination(NodeId),
}

///Both ends of the link leaving a port.
#[derive(Debug,Clone,Copy)]
pub struct Endpoints<'t>
{
	pub nodefrom: Element<'t>,
	pub portfrom: &'t Port,
	///`None` when the link is broken or its far end is unknown.
	pub nodeto: Option<Element<'t>>,
	pub portto: Option<PortIndex>,
	pub link_type: LinkType,
}

///Find the elements at each side of the port `port_idx` of `node_id`.
///Ports with data but no far end, which may happen on broken links, are resolved with `LinkType::Unknown`.
pub fn resolve<'t>(topology:&'t Topology, node_id:&str, port_idx:PortIndex) -> Result<Endpoints<'t>,UnresolvedReason>
{
	let nodefrom = topology.element_by_id(node_id).ok_or(UnresolvedReason::UnknownSource)?;
	let portfrom = nodefrom.port(port_idx).ok_or(UnresolvedReason::MissingPort)?;
	let nodeto = topology.far_end(portfrom);
	let link_type = match &nodeto
	{
		Some(nodeto) => LinkType::between(&nodefrom,nodeto),
		None => LinkType::Unknown,
	};
	Ok(Endpoints{ nodefrom, portfrom, nodeto, portto:portfrom.dest_port, link_type })
}

///The traffic summed over a time range on a port, with its ends.
#[derive(Debug,Clone)]
pub struct AggregatedLink<'t>
{
	pub node_id: NodeId,
	pub port_idx: PortIndex,
	pub rcv_data: f64,
	pub nodefrom: Element<'t>,
	pub portfrom: &'t Port,
	pub nodeto: Element<'t>,
	pub portto: Option<PortIndex>,
	pub link_type: LinkType,
}

///A port of the counters that could not be resolved. It is not part of the aggregation links.
#[derive(Debug,Clone,PartialEq)]
pub struct UnresolvedLink
{
	pub node_id: NodeId,
	pub port_idx: PortIndex,
	pub rcv_data: f64,
	pub reason: UnresolvedReason,
}

///A list of values and their maximum. The maximum of an empty list is 0.
#[derive(Debug,Clone,Default,PartialEq)]
pub struct DataSeries
{
	pub max: f64,
	pub values: Vec<f64>,
}

impl DataSeries
{
	fn compute_max(&mut self)
	{
		self.max = self.values.iter().copied().fold(None,|acc:Option<f64>,v|Some(acc.map_or(v,|m|m.max(v)))).unwrap_or(0.0);
	}
}

///Traffic entering and leaving a node or switch.
#[derive(Debug,Clone)]
pub struct AggregatedSwitch<'t>
{
	pub node: Element<'t>,
	///Values of the links for which this element is `nodeto`.
	pub in_data: DataSeries,
	///Values of the links for which this element is `nodefrom`.
	pub out_data: DataSeries,
}

///Result of [FixedCounters::aggregate].
#[derive(Debug,Clone,Default)]
pub struct Aggregation<'t>
{
	///Number of timestamps selected.
	pub num_timestamps: usize,
	///Sorted by type, then destination and finally source.
	pub links: Vec<AggregatedLink<'t>>,
	///Sorted by level, pod and idx.
	pub switches: Vec<AggregatedSwitch<'t>>,
	pub unresolved: Vec<UnresolvedLink>,
}

impl Aggregation<'_>
{
	///Total of the traffic in the resolved links.
	pub fn total(&self) -> f64
	{
		self.links.iter().map(|link|link.rcv_data).sum()
	}
}

fn in_range(timestamp:&Timestamp, range:Option<TimeRange>) -> bool
{
	match range
	{
		Some((lo,hi)) => *timestamp>=lo && *timestamp<=hi,
		None => true,
	}
}

fn compare_links(a:&AggregatedLink, b:&AggregatedLink) -> Ordering
{
	a.link_type.cmp(&b.link_type)
		.then_with(||a.nodeto.sort_key().cmp(&b.nodeto.sort_key()))
		.then_with(||a.nodefrom.sort_key().cmp(&b.nodefrom.sort_key()))
		.then_with(||a.port_idx.cmp(&b.port_idx))
}

///Counter tables holding increases. Built by [CounterStore::fix].
#[derive(Debug,Default)]
pub struct FixedCounters
{
	tables: BTreeMap<Timestamp,Vec<CounterRecord>>,
}

impl FixedCounters
{
	pub fn len(&self) -> usize
	{
		self.tables.len()
	}
	pub fn is_empty(&self) -> bool
	{
		self.tables.is_empty()
	}
	///Timestamps in ascending order.
	pub fn timestamps(&self) -> impl Iterator<Item=&Timestamp>
	{
		self.tables.keys()
	}
	///First and last timestamps.
	pub fn range(&self) -> Option<TimeRange>
	{
		let first = self.tables.keys().next()?;
		let last = self.tables.keys().next_back()?;
		Some((*first,*last))
	}
	pub fn table(&self, timestamp:&Timestamp) -> Option<&[CounterRecord]>
	{
		self.tables.get(timestamp).map(|records|records.as_slice())
	}
	///Tables whose timestamp is inside `range`, both ends included. All of them when `range` is `None`.
	pub fn tables_in(&self, range:Option<TimeRange>) -> impl Iterator<Item=(&Timestamp,&[CounterRecord])>
	{
		self.tables.iter().filter(move |(timestamp,_)|in_range(timestamp,range)).map(|(timestamp,records)|(timestamp,records.as_slice()))
	}
	/**
	Sum the traffic of each `(node_id,port_idx)` along the timestamps in `range` and resolve the sums against the topology.
	Ports that cannot be resolved are moved to `unresolved`.
	Every element at either end of a link gets an [AggregatedSwitch].
	**/
	pub fn aggregate<'t>(&self, topology:&'t Topology, range:Option<TimeRange>) -> Aggregation<'t>
	{
		let mut num_timestamps = 0;
		let mut sums: BTreeMap<(&str,PortIndex),f64> = BTreeMap::new();
		for (_timestamp,records) in self.tables_in(range)
		{
			num_timestamps += 1;
			for record in records
			{
				*sums.entry((record.node_id.as_str(),record.port_idx)).or_insert(0.0) += record.rcv_data;
			}
		}
		info!("Aggregating counters over {} timestamps ({:?}).",num_timestamps,range);
		let mut links = vec![];
		let mut unresolved = vec![];
		for ((node_id,port_idx),rcv_data) in sums
		{
			let reason = match resolve(topology,node_id,port_idx)
			{
				Ok(Endpoints{nodefrom,portfrom,nodeto:Some(nodeto),portto,link_type}) =>
				{
					links.push(AggregatedLink{ node_id:node_id.to_string(), port_idx, rcv_data, nodefrom, portfrom, nodeto, portto, link_type });
					continue;
				},
				Ok(Endpoints{portfrom,..}) => match &portfrom.dest_node
				{
					Some(id) => UnresolvedReason::UnknownDestination(id.clone()),
					None => UnresolvedReason::BrokenLink,
				},
				Err(reason) => reason,
			};
			unresolved.push(UnresolvedLink{ node_id:node_id.to_string(), port_idx, rcv_data, reason });
		}
		if !unresolved.is_empty()
		{
			warn!("{} ports with counters could not be resolved in the topology.",unresolved.len());
		}
		links.sort_by(compare_links);
		let mut switches: BTreeMap<&str,AggregatedSwitch<'t>> = BTreeMap::new();
		for link in links.iter()
		{
			switches.entry(link.nodefrom.id()).or_insert_with(||AggregatedSwitch{ node:link.nodefrom, in_data:DataSeries::default(), out_data:DataSeries::default() })
				.out_data.values.push(link.rcv_data);
			switches.entry(link.nodeto.id()).or_insert_with(||AggregatedSwitch{ node:link.nodeto, in_data:DataSeries::default(), out_data:DataSeries::default() })
				.in_data.values.push(link.rcv_data);
		}
		let mut switches: Vec<AggregatedSwitch<'t>> = switches.into_iter().map(|(_,switch)|switch).collect();
		switches.sort_by(|a,b|a.node.sort_key().cmp(&b.node.sort_key()));
		for switch in switches.iter_mut()
		{
			switch.in_data.compute_max();
			switch.out_data.compute_max();
		}
		Aggregation{ num_timestamps, links, switches, unresolved }
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use chrono::NaiveDate;

	fn at(second:u32) -> Timestamp
	{
		NaiveDate::from_ymd_opt(2017,3,1).and_then(|d|d.and_hms_opt(10,0,second)).expect("valid date")
	}

	#[test]
	fn parse_skips_non_numeric_rows()
	{
		let text = "node_id,port_idx,rcv_data,xmit_data\nsw1,1,100,5\nsw1,2,abc,5\nsw2,3,7.5,1\nsw3,1.5,1,1\n";
		let records = parse_counters(text.as_bytes()).expect("should parse");
		assert_eq!(records,vec![
			CounterRecord{ node_id:"sw1".to_string(), port_idx:1, rcv_data:100.0 },
			CounterRecord{ node_id:"sw2".to_string(), port_idx:3, rcv_data:7.5 },
		]);
	}

	#[test]
	fn parse_requires_columns()
	{
		assert!(parse_counters("node_id,rcv_data\nsw1,3\n".as_bytes()).is_err());
	}

	#[test]
	fn fix_clamps_resets()
	{
		let mut store = CounterStore::new();
		//Inserted out of order on purpose.
		for (second,value) in [(2,90.0),(0,100.0),(1,150.0)]
		{
			store.insert(at(second),vec![CounterRecord{ node_id:"a".to_string(), port_idx:1, rcv_data:value }]);
		}
		let fixed = store.fix();
		let deltas: Vec<f64> = fixed.tables_in(None).map(|(_,records)|records[0].rcv_data).collect();
		assert_eq!(deltas,vec![0.0,50.0,0.0]);
		assert_eq!(fixed.range(),Some((at(0),at(2))));
	}

	#[test]
	fn series_maximum()
	{
		let mut series = DataSeries{ max:0.0, values:vec![3.0,-1.0,7.0] };
		series.compute_max();
		assert_eq!(series.max,7.0);
		let mut empty = DataSeries::default();
		empty.compute_max();
		assert_eq!(empty.max,0.0);
	}
}
