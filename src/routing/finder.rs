/*!

Replay of the forwarding tables.

[RouteFinder::find_route] walks from a source element towards a destination lid:
* a compute node sends through its only port;
* a switch sends through the port that its table gives for the destination lid;
* the walk stops when the current element has the destination lid.

Each traversed edge is recorded in a [Route] as `from-to` lids. Fat-trees have a unique path between a switch and a lid of the tables, so the walk never loops on correct tables. Incorrect tables are caught by the [MAXIMUM_HOPS] bound.

Batches of routes, for jobs or for components of the tree, collect the failures of individual pairs in a [RouteBatch] instead of aborting.

*/

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug,info,warn};

use crate::error;
use crate::error::Error;
use crate::jobs::Job;
use crate::topology::{Topology,Element,NodeId,Lid,PortIndex};
use super::{RoutingTable,RoutingTableStore};

///The longest walk in a fat-tree of four levels goes up three levels and down three levels. Anything longer than this is a loop.
pub const MAXIMUM_HOPS: usize = 8;

///A traversed edge, by the lids of its ends.
#[derive(Debug,Clone,Copy,PartialEq,Eq,PartialOrd,Ord,Hash)]
pub struct RouteLink
{
	pub from: Lid,
	pub to: Lid,
}

impl fmt::Display for RouteLink
{
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result
	{
		write!(f,"{}-{}",self.from,self.to)
	}
}

///The elements and links visited by some set of walks.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct Route
{
	///Lids of the visited elements.
	pub nodes: BTreeSet<Lid>,
	pub links: BTreeSet<RouteLink>,
	///Destinations of the walks, without repetitions.
	pub dlids: Vec<Lid>,
}

impl Route
{
	pub fn new() -> Route
	{
		Route::default()
	}
	pub fn is_empty(&self) -> bool
	{
		self.nodes.is_empty() && self.links.is_empty()
	}
	pub fn contains_link(&self, from:Lid, to:Lid) -> bool
	{
		self.links.contains(&RouteLink{from,to})
	}
	fn add_dlids<I:IntoIterator<Item=Lid>>(&mut self, dlids:I)
	{
		for dlid in dlids
		{
			if !self.dlids.contains(&dlid)
			{
				self.dlids.push(dlid);
			}
		}
	}
}

#[derive(Debug,Clone,PartialEq,Eq)]
pub enum RoutingError
{
	///The active table has no entry for the switch.
	NoTableEntry{ switch:NodeId, dlid:Lid },
	///The table does not give a port towards the destination, or gives a port the element lacks.
	NoForwardingPort{ element:NodeId, dlid:Lid, port:Option<PortIndex> },
	///The port leads to nothing known in the topology.
	UnresolvedHop{ element:NodeId, port:PortIndex, dest_node:Option<NodeId> },
	///The walk did not reach the destination in [MAXIMUM_HOPS].
	HopLimitExceeded{ source:Lid, dlid:Lid },
}

impl fmt::Display for RoutingError
{
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result
	{
		match self
		{
			RoutingError::NoTableEntry{switch,dlid} => write!(f,"no table entry for switch {} (towards lid {})",switch,dlid),
			RoutingError::NoForwardingPort{element,dlid,port:Some(port)} => write!(f,"no forwarding port {} in {} towards lid {}",port,element,dlid),
			RoutingError::NoForwardingPort{element,dlid,port:None} => write!(f,"no forwarding port in {} towards lid {}",element,dlid),
			RoutingError::UnresolvedHop{element,port,dest_node} => write!(f,"unresolved hop from port {} of {} to {:?}",port,element,dest_node),
			RoutingError::HopLimitExceeded{source,dlid} => write!(f,"hop limit exceeded from lid {} towards lid {}",source,dlid),
		}
	}
}

impl std::error::Error for RoutingError {}

///A pair of a batch that could not be routed.
#[derive(Debug,Clone,PartialEq,Eq)]
pub struct RouteFailure
{
	pub source: Lid,
	pub dlid: Lid,
	pub error: RoutingError,
}

///The combined route of a batch and the pairs that failed.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct RouteBatch
{
	pub route: Route,
	pub failures: Vec<RouteFailure>,
}

///Something selected at the left (sources) and right (destinations) sides.
#[derive(Debug,Clone,PartialEq,Eq)]
pub struct Sides<T>
{
	pub left: Vec<T>,
	pub right: Vec<T>,
}

impl<T> Default for Sides<T>
{
	fn default() -> Sides<T>
	{
		Sides{ left:vec![], right:vec![] }
	}
}

impl<T> Sides<T>
{
	pub fn is_empty(&self) -> bool
	{
		self.left.is_empty() && self.right.is_empty()
	}
}

///A link identified by the port it leaves from.
#[derive(Debug,Clone,PartialEq,Eq,PartialOrd,Ord,Hash)]
pub struct LinkKey
{
	pub node_id: NodeId,
	pub port_idx: PortIndex,
}

impl LinkKey
{
	pub fn new(node_id:&str, port_idx:PortIndex) -> LinkKey
	{
		LinkKey{ node_id:node_id.to_string(), port_idx }
	}
}

///Which end of a link to look the forwarding state at.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum LinkSide
{
	///The element the link leaves from, through the link port.
	From,
	///The element the link arrives at, through its port of the link.
	To,
}

///Components of the tree chosen to route among. Either switches or links may be selected, not both.
#[derive(Debug,Clone,Default,PartialEq,Eq)]
pub struct Selection
{
	///Ids of nodes or switches.
	pub switches: Sides<NodeId>,
	pub links: Sides<LinkKey>,
}

struct LinkEnds<'t>
{
	from: Element<'t>,
	to: Element<'t>,
	portto: Option<PortIndex>,
}

///Routes over a topology with a fixed routing table.
#[derive(Debug,Clone)]
pub struct RouteFinder<'t>
{
	topology: &'t Topology,
	table: Arc<RoutingTable>,
}

impl<'t> RouteFinder<'t>
{
	pub fn new(topology:&'t Topology, table:Arc<RoutingTable>) -> RouteFinder<'t>
	{
		RouteFinder{ topology, table }
	}
	///A finder over the table currently active in the store.
	pub fn from_store(topology:&'t Topology, store:&RoutingTableStore) -> Result<RouteFinder<'t>,Error>
	{
		let table = store.active().ok_or_else(||error!(no_active_routing_table))?;
		Ok(RouteFinder::new(topology,table))
	}
	pub fn topology(&self) -> &'t Topology
	{
		self.topology
	}
	pub fn table(&self) -> &RoutingTable
	{
		&self.table
	}
	/**
	Walk from `source` until reaching an element with lid `dlid`, adding the visited lids and edges to `route`.
	Returns the number of hops. On error whatever was recorded before remains in `route`.
	**/
	pub fn find_route(&self, source:Element<'t>, dlid:Lid, route:&mut Route) -> Result<usize,RoutingError>
	{
		let mut current = source;
		let mut hops = 0;
		route.nodes.insert(current.lid());
		while current.lid() != dlid
		{
			if hops >= MAXIMUM_HOPS
			{
				return Err(RoutingError::HopLimitExceeded{ source:source.lid(), dlid });
			}
			let port_idx = match current
			{
				Element::Node(_) => 1,
				Element::Switch(switch) =>
				{
					let table = self.table.switch(&switch.id).ok_or_else(||RoutingError::NoTableEntry{ switch:switch.id.clone(), dlid })?;
					table.port_for(dlid).ok_or_else(||RoutingError::NoForwardingPort{ element:switch.id.clone(), dlid, port:None })?
				},
			};
			let port = current.port(port_idx).ok_or_else(||RoutingError::NoForwardingPort{ element:current.id().to_string(), dlid, port:Some(port_idx) })?;
			let next = self.topology.far_end(port).ok_or_else(||RoutingError::UnresolvedHop{ element:current.id().to_string(), port:port_idx, dest_node:port.dest_node.clone() })?;
			route.links.insert(RouteLink{ from:current.lid(), to:next.lid() });
			route.nodes.insert(next.lid());
			current = next;
			hops += 1;
		}
		Ok(hops)
	}
	///The route of a single walk.
	pub fn route(&self, source:Element<'t>, dlid:Lid) -> Result<Route,RoutingError>
	{
		let mut route = Route::new();
		self.find_route(source,dlid,&mut route)?;
		route.add_dlids(Some(dlid));
		Ok(route)
	}
	///Walk every source towards every destination, accumulating into a single route.
	fn route_all(&self, sources:&[Element<'t>], dlids:&[Lid], route:&mut Route, failures:&mut Vec<RouteFailure>)
	{
		for (source,&dlid) in sources.iter().cartesian_product(dlids.iter())
		{
			if let Err(error) = self.find_route(*source,dlid,route)
			{
				debug!("route from {} to lid {} failed: {}",source,dlid,error);
				failures.push(RouteFailure{ source:source.lid(), dlid, error });
			}
		}
	}
	/**
	Route of each job, from its leaf switches to its nodes, combined over the jobs.
	The nodes and the destinations are the union over the jobs. The links are the ones present in the route of every job.
	Like every [Route], the links iterate sorted by `(from,to)` lid, not in the order the first job walked them.
	**/
	pub fn routes_for_jobs(&self, jobs:&[Job]) -> RouteBatch
	{
		let mut batch = RouteBatch::default();
		let mut links: Option<BTreeSet<RouteLink>> = None;
		for job in jobs
		{
			let sources: Vec<Element<'t>> = job.leaf_switches.iter()
				.filter_map(|leaf|self.topology.switch_by_id(&leaf.id).map(Element::Switch))
				.collect();
			let dlids: Vec<Lid> = job.nodes.iter()
				.filter_map(|id|self.topology.node_by_id(id).map(|node|node.lid))
				.collect();
			let mut route = Route::new();
			self.route_all(&sources,&dlids,&mut route,&mut batch.failures);
			route.add_dlids(dlids);
			debug!("job {} routed from {} leaves to {} nodes: {} elements, {} links",job.id,sources.len(),route.dlids.len(),route.nodes.len(),route.links.len());
			batch.route.nodes.extend(route.nodes.iter().copied());
			batch.route.add_dlids(route.dlids.iter().copied());
			links = Some(match links
			{
				None => route.links,
				Some(common) => common.intersection(&route.links).copied().collect(),
			});
		}
		batch.route.links = links.unwrap_or_default();
		info!("Found route for {} jobs: {} destinations, {} elements, {} shared links, {} failures.",jobs.len(),batch.route.dlids.len(),batch.route.nodes.len(),batch.route.links.len(),batch.failures.len());
		batch
	}
	fn link_ends(&self, key:&LinkKey) -> Result<LinkEnds<'t>,Error>
	{
		let from = self.topology.element_by_id(&key.node_id).ok_or_else(||error!(bad_argument).with_message(format!("unknown element {} of selected link",key.node_id)))?;
		let port = from.port(key.port_idx).ok_or_else(||error!(bad_argument).with_message(format!("{} has no port {}",key.node_id,key.port_idx)))?;
		let to = self.topology.far_end(port).ok_or_else(||error!(bad_argument).with_message(format!("the link at port {} of {} is broken",key.port_idx,key.node_id)))?;
		Ok(LinkEnds{ from, to, portto:port.dest_port })
	}
	///Lids forwarded through the link, according to the table of the element at `side`.
	pub fn dlids_for_link(&self, key:&LinkKey, side:LinkSide) -> Result<BTreeSet<Lid>,Error>
	{
		let ends = self.link_ends(key)?;
		let (element,port) = match side
		{
			LinkSide::From => (ends.from,Some(key.port_idx)),
			LinkSide::To => (ends.to,ends.portto),
		};
		let lids = match (self.table.switch(element.id()),port)
		{
			(Some(table),Some(port)) => table.lids_through(port).collect(),
			_ => BTreeSet::new(),
		};
		Ok(lids)
	}
	/**
	Route among selected components of the tree.
	* Selected switches at the left are sources. At the right, a level-1 switch stands for the lids of its compute nodes and any other element for its own lid.
	* Selected links at the left give their origin as source. At the right they give the lid of their destination.
	* When no destination is given, switch selections use the destinations of `job_route`, and link selections the lids forwarded through the left links, restricted to those of `job_route` when it has any. Sources are completed symmetrically, looking at the right links from their far end.
	* With nothing selected the result is `job_route` itself.
	**/
	pub fn routes_for_selection(&self, selection:&Selection, job_route:Option<&Route>) -> Result<RouteBatch,Error>
	{
		let switch_based = !selection.switches.is_empty();
		let link_based = !selection.links.is_empty();
		if switch_based && link_based
		{
			return Err(error!(bad_argument).with_message("cannot route on switches and links at the same time".to_string()));
		}
		let job_dlids: &[Lid] = job_route.map(|route|route.dlids.as_slice()).unwrap_or(&[]);
		let element = |id:&str| self.topology.element_by_id(id).ok_or_else(||error!(bad_argument).with_message(format!("unknown element {} in selection",id)));
		let mut sources: Vec<Element<'t>> = vec![];
		let mut dlids: Vec<Lid> = vec![];
		if switch_based
		{
			for id in selection.switches.left.iter()
			{
				sources.push(element(id.as_str())?);
			}
			for id in selection.switches.right.iter()
			{
				let target = element(id.as_str())?;
				if target.level()==1
				{
					dlids.extend(target.ports().iter().filter_map(|port|port.dest_node.as_deref().and_then(|dest|self.topology.node_by_id(dest)).map(|node|node.lid)));
				}
				else
				{
					dlids.push(target.lid());
				}
			}
		}
		else
		{
			for key in selection.links.left.iter()
			{
				sources.push(self.link_ends(key)?.from);
			}
			for key in selection.links.right.iter()
			{
				dlids.push(self.link_ends(key)?.to.lid());
			}
		}
		if sources.is_empty() && dlids.is_empty()
		{
			return Ok(RouteBatch{ route:job_route.cloned().unwrap_or_default(), failures:vec![] });
		}
		if dlids.is_empty()
		{
			if switch_based
			{
				dlids.extend_from_slice(job_dlids);
			}
			else
			{
				for key in selection.links.left.iter()
				{
					dlids.extend(self.dlids_for_link(key,LinkSide::From)?);
				}
				info!("Using {} destinations for the selected links.",dlids.len());
				if !job_dlids.is_empty()
				{
					dlids.retain(|lid|job_dlids.contains(lid));
					info!("Restricting to {} destinations of the selected jobs.",dlids.len());
				}
			}
		}
		if sources.is_empty()
		{
			let mut lids: Vec<Lid> = vec![];
			if switch_based
			{
				lids.extend_from_slice(job_dlids);
			}
			else
			{
				for key in selection.links.right.iter()
				{
					lids.extend(self.dlids_for_link(key,LinkSide::To)?);
				}
				info!("Using {} sources for the selected links.",lids.len());
				if !job_dlids.is_empty()
				{
					lids.retain(|lid|job_dlids.contains(lid));
					info!("Restricting to {} sources of the selected jobs.",lids.len());
				}
			}
			for lid in lids
			{
				match self.topology.element_by_lid(lid)
				{
					Some(source) => sources.push(source),
					None => warn!("source lid {} is not in the topology.",lid),
				}
			}
		}
		let sources: Vec<Element<'t>> = sources.into_iter().unique_by(|source|source.lid()).collect();
		let dlids: Vec<Lid> = dlids.into_iter().unique().collect();
		info!("Finding routes for {} sources and {} destinations.",sources.len(),dlids.len());
		let mut batch = RouteBatch::default();
		self.route_all(&sources,&dlids,&mut batch.route,&mut batch.failures);
		batch.route.add_dlids(dlids);
		Ok(batch)
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::topology::{TopologyData,NodeData,SwitchData,Port};

	///Two compute nodes, lids 10 and 11, under a single switch with lid 20.
	fn small() -> Topology
	{
		let nodes = vec![
			NodeData{ id:"n10".to_string(), lid:10, desc:"n10 HCA-1".to_string(), ports:vec![Port::to("s20",1)] },
			NodeData{ id:"n11".to_string(), lid:11, desc:"n11 HCA-1".to_string(), ports:vec![Port::to("s20",2)] },
		];
		let switches = vec![
			SwitchData{ id:"s20".to_string(), lid:20, desc:"leaf".to_string(), lvl:1, pod:Some(0), core:None, idx:Some(0), ports:vec![Port::to("n10",1),Port::to("n11",1),Port::broken()] },
		];
		Topology::load(TopologyData{ nodes, switches, ..TopologyData::default() }).expect("valid topology")
	}

	fn table(text:&str) -> Arc<RoutingTable>
	{
		Arc::new(RoutingTable::parse(text.as_bytes()).expect("valid table"))
	}

	#[test]
	fn walk_between_siblings()
	{
		let topology = small();
		let finder = RouteFinder::new(&topology,table("switch,lids\ns20,10:1,11:2\n"));
		let source = topology.element_by_lid(10).expect("node 10");
		let mut route = Route::new();
		assert_eq!(finder.find_route(source,11,&mut route),Ok(2));
		assert_eq!(route.nodes.iter().copied().collect::<Vec<_>>(),vec![10,11,20]);
		let links: Vec<String> = route.links.iter().map(|link|link.to_string()).collect();
		assert_eq!(links,vec!["10-20".to_string(),"20-11".to_string()]);
		assert_eq!(finder.find_route(source,10,&mut Route::new()),Ok(0));
	}

	#[test]
	fn failures_keep_partial_route()
	{
		let topology = small();
		let source = topology.element_by_lid(10).expect("node 10");
		let finder = RouteFinder::new(&topology,table("switch,lids\ns20,10:1\n"));
		let mut route = Route::new();
		assert!(matches!(finder.find_route(source,11,&mut route),Err(RoutingError::NoForwardingPort{port:None,..})));
		assert!(route.contains_link(10,20));
		let broken = RouteFinder::new(&topology,table("switch,lids\ns20,11:3\n"));
		assert!(matches!(broken.route(source,11),Err(RoutingError::UnresolvedHop{port:3,..})));
		let missing = RouteFinder::new(&topology,table("switch,lids\ns99,11:2\n"));
		assert!(matches!(missing.route(source,11),Err(RoutingError::NoTableEntry{..})));
		let looping = RouteFinder::new(&topology,table("switch,lids\ns20,11:1\n"));
		assert_eq!(looping.route(source,11),Err(RoutingError::HopLimitExceeded{ source:10, dlid:11 }));
	}

	#[test]
	fn selection_cannot_mix()
	{
		let topology = small();
		let finder = RouteFinder::new(&topology,table("switch,lids\ns20,10:1,11:2\n"));
		let selection = Selection{
			switches: Sides{ left:vec!["n10".to_string()], right:vec![] },
			links: Sides{ left:vec![LinkKey::new("s20",1)], right:vec![] },
		};
		assert!(finder.routes_for_selection(&selection,None).is_err());
		let empty = finder.routes_for_selection(&Selection::default(),None).expect("empty selection");
		assert!(empty.route.is_empty());
	}

	#[test]
	fn leaf_switch_expands_to_its_nodes()
	{
		let topology = small();
		let finder = RouteFinder::new(&topology,table("switch,lids\ns20,10:1,11:2\n"));
		let selection = Selection{ switches:Sides{ left:vec!["n10".to_string()], right:vec!["s20".to_string()] }, ..Selection::default() };
		let batch = finder.routes_for_selection(&selection,None).expect("valid selection");
		assert_eq!(batch.route.dlids,vec![10,11]);
		assert!(batch.route.contains_link(20,11));
		assert!(batch.failures.is_empty());
		let through = finder.dlids_for_link(&LinkKey::new("s20",2),LinkSide::From).expect("link exists");
		assert_eq!(through.into_iter().collect::<Vec<_>>(),vec![11]);
	}
}
