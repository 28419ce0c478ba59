/*!

Forwarding tables of the switches, one table per timestamp at which they were dumped.

A routing file has a header row, which is discarded, and then a row per switch. The first column is the switch id and each of the remaining non-empty columns is a `lid:port` pair, telling through which port the switch forwards packets towards that lid. Ports are 1-based, as in the topology.

One of the loaded tables is the *active* one, used by the [RouteFinder](finder::RouteFinder). It can be changed through a shared reference; finders keep working with the snapshot they were built with.

*/

pub mod finder;

use std::collections::{BTreeMap,BTreeSet};
use std::fs::File;
use std::io::{BufReader,Read};
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use log::{info,warn};

use crate::Timestamp;
use crate::error;
use crate::error::Error;
use crate::topology::{NodeId,Lid,PortIndex};

pub use self::finder::{RouteFinder,Route,RouteLink,RouteBatch,RouteFailure,RoutingError,Selection,Sides,LinkKey,LinkSide,MAXIMUM_HOPS};

///The forwarding state of a single switch.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct SwitchTable
{
	///Port towards each destination lid.
	pub lidmap: BTreeMap<Lid,PortIndex>,
	///Destination lids forwarded through each port.
	pub portmap: BTreeMap<PortIndex,BTreeSet<Lid>>,
}

impl SwitchTable
{
	pub fn insert(&mut self, lid:Lid, port:PortIndex)
	{
		self.lidmap.insert(lid,port);
		self.portmap.entry(port).or_insert_with(BTreeSet::new).insert(lid);
	}
	pub fn port_for(&self, lid:Lid) -> Option<PortIndex>
	{
		self.lidmap.get(&lid).copied()
	}
	///Lids forwarded through `port`. Empty when the port does not appear in the table.
	pub fn lids_through(&self, port:PortIndex) -> impl Iterator<Item=Lid> + '_
	{
		self.portmap.get(&port).into_iter().flat_map(|lids|lids.iter().copied())
	}
}

///Forwarding tables of all the switches at some time.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct RoutingTable
{
	pub switches: BTreeMap<NodeId,SwitchTable>,
}

fn parse_entry(entry:&str) -> Option<(Lid,PortIndex)>
{
	let mut fields = entry.split(':');
	let lid = fields.next()?.trim().parse().ok()?;
	let port = fields.next()?.trim().parse().ok()?;
	Some((lid,port))
}

impl RoutingTable
{
	pub fn parse<R:Read>(reader:R) -> Result<RoutingTable,Error>
	{
		let mut csv_reader = csv::ReaderBuilder::new()
			.has_headers(true)
			.flexible(true)
			.trim(csv::Trim::All)
			.from_reader(reader);
		let mut table = RoutingTable::default();
		for row in csv_reader.records()
		{
			let row = row.map_err(|e|{
				let line = e.position().map(|p|p.line() as usize);
				error!(could_not_parse_file,None,line).with_message(e.to_string())
			})?;
			let line = row.position().map(|p|p.line() as usize);
			let mut fields = row.iter();
			let switch_id = match fields.next()
			{
				Some(id) if !id.is_empty() => id,
				_ => continue,
			};
			let switch = table.switches.entry(switch_id.to_string()).or_insert_with(SwitchTable::default);
			//Files are usually written with a trailing comma.
			for entry in fields.filter(|entry|!entry.is_empty())
			{
				let (lid,port) = parse_entry(entry).ok_or_else(||error!(could_not_parse_file,None,line).with_message(format!("bad forwarding entry '{}' of switch {}",entry,switch_id)))?;
				switch.insert(lid,port);
			}
		}
		Ok(table)
	}
	pub fn from_file(path:&Path) -> Result<RoutingTable,Error>
	{
		let file = File::open(path).map_err(|err|error!(could_not_open_file,path.to_path_buf(),err))?;
		RoutingTable::parse(BufReader::new(file)).map_err(|e|e.with_file(path.to_path_buf()))
	}
	pub fn switch(&self, id:&str) -> Option<&SwitchTable>
	{
		self.switches.get(id)
	}
	///Number of `lid:port` entries over all the switches.
	pub fn num_entries(&self) -> usize
	{
		self.switches.values().map(|switch|switch.lidmap.len()).sum()
	}
}

#[derive(Debug)]
struct ActiveTable
{
	timestamp: Timestamp,
	table: Arc<RoutingTable>,
}

///All the routing tables of a dataset and which of them is active.
#[derive(Debug)]
pub struct RoutingTableStore
{
	tables: BTreeMap<Timestamp,Arc<RoutingTable>>,
	active: ArcSwapOption<ActiveTable>,
}

impl Default for RoutingTableStore
{
	fn default() -> RoutingTableStore
	{
		RoutingTableStore{ tables:BTreeMap::new(), active:ArcSwapOption::empty() }
	}
}

impl RoutingTableStore
{
	pub fn new() -> RoutingTableStore
	{
		RoutingTableStore::default()
	}
	///Store the table of a timestamp. A table previously stored with the same timestamp is replaced, but if it was active it remains active until another selection.
	pub fn insert(&mut self, timestamp:Timestamp, table:RoutingTable)
	{
		if self.tables.insert(timestamp,Arc::new(table)).is_some()
		{
			warn!("routing table for {} was loaded twice; keeping the last one.",timestamp);
		}
	}
	pub fn load<R:Read>(&mut self, timestamp:Timestamp, reader:R) -> Result<usize,Error>
	{
		let table = RoutingTable::parse(reader)?;
		let amount = table.switches.len();
		self.insert(timestamp,table);
		Ok(amount)
	}
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
	pub fn get(&self, timestamp:&Timestamp) -> Option<Arc<RoutingTable>>
	{
		self.tables.get(timestamp).cloned()
	}
	///Make the table of `timestamp` the active one.
	pub fn select_active(&self, timestamp:&Timestamp) -> Result<(),Error>
	{
		let table = self.get(timestamp).ok_or_else(||error!(unknown_timestamp).with_message(format!("there is no routing table for {}",timestamp)))?;
		self.active.store(Some(Arc::new(ActiveTable{ timestamp:*timestamp, table })));
		info!("Routing table of {} is now active.",timestamp);
		Ok(())
	}
	///Snapshot of the active table.
	pub fn active(&self) -> Option<Arc<RoutingTable>>
	{
		self.active.load_full().map(|active|Arc::clone(&active.table))
	}
	pub fn active_timestamp(&self) -> Option<Timestamp>
	{
		self.active.load_full().map(|active|active.timestamp)
	}
	///Pairs `(redundant,kept)` where the table at `redundant` equals the previous kept table `kept`.
	fn redundant_pairs(&self) -> Vec<(Timestamp,Timestamp)>
	{
		let mut pairs = vec![];
		let mut kept: Option<(&Timestamp,&Arc<RoutingTable>)> = None;
		for (timestamp,table) in self.tables.iter()
		{
			match kept
			{
				Some((kept_timestamp,kept_table)) if kept_table==table => pairs.push((*timestamp,*kept_timestamp)),
				_ => kept = Some((timestamp,table)),
			}
		}
		pairs
	}
	///Timestamps whose table does not bring any change with respect to the previous one.
	pub fn redundant_tables(&self) -> Vec<Timestamp>
	{
		self.redundant_pairs().into_iter().map(|(redundant,_)|redundant).collect()
	}
	///Drop the redundant tables. If the active one is dropped the identical kept table becomes active. Returns how many were dropped.
	pub fn remove_redundant(&mut self) -> usize
	{
		let pairs = self.redundant_pairs();
		let active = self.active_timestamp();
		for (redundant,kept) in pairs.iter()
		{
			self.tables.remove(redundant);
			if active.as_ref()==Some(redundant)
			{
				if let Some(table) = self.tables.get(kept)
				{
					self.active.store(Some(Arc::new(ActiveTable{ timestamp:*kept, table:Arc::clone(table) })));
				}
			}
		}
		info!("Identified {} routing tables as redundant.",pairs.len());
		pairs.len()
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use chrono::NaiveDate;

	fn at(minute:u32) -> Timestamp
	{
		NaiveDate::from_ymd_opt(2017,3,1).and_then(|d|d.and_hms_opt(10,minute,0)).expect("valid date")
	}

	#[test]
	fn parse_lid_port_pairs()
	{
		let text = "switch,entries\nsw20,10:1,11:2,30:3,\nsw30,10:1, 11:1 ,\n";
		let table = RoutingTable::parse(text.as_bytes()).expect("should parse");
		assert_eq!(table.switches.len(),2);
		let sw20 = table.switch("sw20").expect("sw20 present");
		assert_eq!(sw20.port_for(11),Some(2));
		assert_eq!(sw20.port_for(12),None);
		let sw30 = table.switch("sw30").expect("sw30 present");
		assert_eq!(sw30.lids_through(1).collect::<Vec<_>>(),vec![10,11]);
		assert_eq!(sw30.lids_through(5).count(),0);
		assert_eq!(table.num_entries(),5);
	}

	#[test]
	fn bad_entry_is_reported()
	{
		assert!(RoutingTable::parse("h\nsw,10-1\n".as_bytes()).is_err());
	}

	#[test]
	fn active_snapshot()
	{
		let mut store = RoutingTableStore::new();
		store.load(at(0),"h\nsw,1:1\n".as_bytes()).expect("parse");
		store.load(at(1),"h\nsw,1:2\n".as_bytes()).expect("parse");
		assert!(store.active().is_none());
		store.select_active(&at(0)).expect("known timestamp");
		let snapshot = store.active().expect("active");
		store.select_active(&at(1)).expect("known timestamp");
		assert_eq!(snapshot.switch("sw").and_then(|s|s.port_for(1)),Some(1));
		assert_eq!(store.active().and_then(|t|t.switch("sw").and_then(|s|s.port_for(1))),Some(2));
		assert!(store.select_active(&at(7)).is_err());
	}

	#[test]
	fn redundant_tables_are_dropped()
	{
		let mut store = RoutingTableStore::new();
		for (minute,text) in [(0,"h\nsw,1:1\n"),(1,"h\nsw,1:1\n"),(2,"h\nsw,1:2\n"),(3,"h\nsw,1:2\n"),(4,"h\nsw,1:2\n")]
		{
			store.load(at(minute),text.as_bytes()).expect("parse");
		}
		assert_eq!(store.redundant_tables(),vec![at(1),at(3),at(4)]);
		store.select_active(&at(4)).expect("known timestamp");
		assert_eq!(store.remove_redundant(),3);
		assert_eq!(store.timestamps().copied().collect::<Vec<_>>(),vec![at(0),at(2)]);
		assert_eq!(store.active_timestamp(),Some(at(2)));
	}
}
