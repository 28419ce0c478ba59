
/*!

A Topology holds the compute nodes and switches of a fat-tree and how their ports are connected.

The topology is read from a JSON description (see [TopologyData]) and is never modified after [Topology::load]. Every other part of the crate receives it by reference.

# Source format

```ignore
{
	"name": "cluster", "num_cores": 2, "num_pods": 2,
	"num_L1L0": 2, "num_L1L2": 2, "num_L2L1": 2, "num_L2L3": 1, "num_L3L2": 2,
	"nodes": [ {"id":"n0", "lid":100, "desc":"node0 HCA-1", "ports":[{"dest_node":"l1-0","dest_port":1}]} ],
	"switches": [ {"id":"l1-0", "lid":10, "lvl":1, "pod":0, "idx":0, "ports":[ ... ]} ]
}
```

A port with an empty `dest_node` is a broken link. Port indices are 1-based, as in routing tables and counter files.

A raw dump without levels, pods or cores can be completed with [preprocess](preprocess::preprocess).

*/

pub mod preprocess;

use std::collections::{BTreeMap,BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader,Read};
use std::path::Path;

use log::{info,warn};
use serde::{Deserialize,Deserializer,Serialize};

use crate::error;
use crate::error::Error;

/// Some things most uses of the topology module will use.
pub mod prelude
{
	pub use super::{Topology,TopologyData,NodeData,SwitchData,Element,Node,Switch,Port,NodeId,Lid,PortIndex};
}

///Primary identifier of nodes and switches in the topology description.
pub type NodeId = String;
///Logical identifier employed by the forwarding tables.
pub type Lid = u32;
///1-based index of a port.
pub type PortIndex = usize;

///Number of levels in the fat-tree, the compute nodes being level 0.
pub const NUM_LEVELS: usize = 4;

///A port of a node or switch.
///`dest_node` is `None` for broken links.
#[derive(Debug,Clone,Default,PartialEq,Eq,Serialize,Deserialize)]
pub struct Port
{
	#[serde(default,deserialize_with="deserialize_optional_id")]
	pub dest_node: Option<NodeId>,
	#[serde(default,deserialize_with="deserialize_optional_port")]
	pub dest_port: Option<PortIndex>,
}

impl Port
{
	pub fn to(dest_node:&str, dest_port:PortIndex) -> Port
	{
		Port{ dest_node:Some(dest_node.to_string()), dest_port:Some(dest_port) }
	}
	pub fn broken() -> Port
	{
		Port::default()
	}
}

///An end compute node. Always at level 0.
#[derive(Debug,Clone,PartialEq)]
pub struct Node
{
	pub id: NodeId,
	pub lid: Lid,
	pub desc: String,
	pub ports: Vec<Port>,
}

impl Node
{
	///The name by which the job scheduler knows the node: the first token of its description.
	pub fn name(&self) -> Option<&str>
	{
		self.desc.split_whitespace().next()
	}
	///The single port towards the level-1 switch.
	pub fn uplink(&self) -> Option<&Port>
	{
		self.ports.first()
	}
}

///A switch at level 1, 2 or 3.
#[derive(Debug,Clone,PartialEq)]
pub struct Switch
{
	pub id: NodeId,
	pub lid: Lid,
	pub desc: String,
	pub level: u8,
	///Pod of level 1 and 2 switches.
	pub pod: Option<i64>,
	///Core name of level 2 and 3 switches.
	pub core: Option<String>,
	///Dense index of `core`, in order of first appearance.
	pub coreid: Option<usize>,
	///Position of the switch inside its level.
	pub idx: Option<usize>,
	pub ports: Vec<Port>,
}

///Either a node or a switch. This is what lookups that may return any of them give.
#[derive(Debug,Clone,Copy,PartialEq)]
pub enum Element<'a>
{
	Node(&'a Node),
	Switch(&'a Switch),
}

///Key to sort elements: level, pod, idx and finally the id.
pub type SortKey<'a> = (u8,Option<i64>,Option<usize>,&'a str);

impl<'a> Element<'a>
{
	pub fn id(&self) -> &'a str
	{
		match self
		{
			Element::Node(node) => &node.id,
			Element::Switch(switch) => &switch.id,
		}
	}
	pub fn lid(&self) -> Lid
	{
		match self
		{
			Element::Node(node) => node.lid,
			Element::Switch(switch) => switch.lid,
		}
	}
	pub fn level(&self) -> u8
	{
		match self
		{
			Element::Node(_) => 0,
			Element::Switch(switch) => switch.level,
		}
	}
	pub fn pod(&self) -> Option<i64>
	{
		match self
		{
			Element::Node(_) => None,
			Element::Switch(switch) => switch.pod,
		}
	}
	pub fn idx(&self) -> Option<usize>
	{
		match self
		{
			Element::Node(_) => None,
			Element::Switch(switch) => switch.idx,
		}
	}
	pub fn desc(&self) -> &'a str
	{
		match self
		{
			Element::Node(node) => &node.desc,
			Element::Switch(switch) => &switch.desc,
		}
	}
	pub fn ports(&self) -> &'a [Port]
	{
		match self
		{
			Element::Node(node) => &node.ports,
			Element::Switch(switch) => &switch.ports,
		}
	}
	///The port with 1-based index `port_idx`.
	pub fn port(&self, port_idx:PortIndex) -> Option<&'a Port>
	{
		if port_idx==0
		{
			return None;
		}
		self.ports().get(port_idx-1)
	}
	pub fn is_node(&self) -> bool
	{
		matches!(self,Element::Node(_))
	}
	pub fn as_switch(&self) -> Option<&'a Switch>
	{
		match self
		{
			Element::Switch(switch) => Some(*switch),
			Element::Node(_) => None,
		}
	}
	pub fn sort_key(&self) -> SortKey<'a>
	{
		(self.level(),self.pod(),self.idx(),self.id())
	}
}

impl fmt::Display for Element<'_>
{
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result
	{
		write!(f,"{}(lvl {}, lid {})",self.id(),self.level(),self.lid())
	}
}

///A node as it appears in the topology description.
#[derive(Debug,Clone,Serialize,Deserialize)]
pub struct NodeData
{
	#[serde(deserialize_with="deserialize_id")]
	pub id: NodeId,
	pub lid: Lid,
	#[serde(default)]
	pub desc: String,
	#[serde(default)]
	pub ports: Vec<Port>,
}

///A switch as it appears in the topology description.
///Raw dumps have no `lvl`, which is then kept as -1 until [preprocess](preprocess::preprocess) assigns it.
#[derive(Debug,Clone,Serialize,Deserialize)]
pub struct SwitchData
{
	#[serde(deserialize_with="deserialize_id")]
	pub id: NodeId,
	pub lid: Lid,
	#[serde(default)]
	pub desc: String,
	#[serde(default="unassigned_level")]
	pub lvl: i64,
	#[serde(default,skip_serializing_if="Option::is_none")]
	pub pod: Option<i64>,
	#[serde(default,skip_serializing_if="Option::is_none")]
	pub core: Option<String>,
	#[serde(default,skip_serializing_if="Option::is_none")]
	pub idx: Option<usize>,
	#[serde(default)]
	pub ports: Vec<Port>,
}

fn unassigned_level() -> i64
{
	-1
}

///The whole topology description.
#[derive(Debug,Clone,Default,Serialize,Deserialize)]
pub struct TopologyData
{
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub num_cores: usize,
	#[serde(default)]
	pub num_pods: usize,
	#[serde(default,rename="num_L1L0")]
	pub num_l1_l0: usize,
	#[serde(default,rename="num_L1L2")]
	pub num_l1_l2: usize,
	#[serde(default,rename="num_L2L1")]
	pub num_l2_l1: usize,
	#[serde(default,rename="num_L2L3")]
	pub num_l2_l3: usize,
	#[serde(default,rename="num_L3L2")]
	pub num_l3_l2: usize,
	#[serde(default)]
	pub nodes: Vec<NodeData>,
	#[serde(default)]
	pub switches: Vec<SwitchData>,
}

impl TopologyData
{
	pub fn from_reader<R:Read>(reader:R) -> Result<TopologyData,Error>
	{
		serde_json::from_reader(reader).map_err(|e|error!(could_not_parse_file,None,Some(e.line())).with_message(e.to_string()))
	}
	pub fn from_file(path:&Path) -> Result<TopologyData,Error>
	{
		let file = File::open(path).map_err(|err|error!(could_not_open_file,path.to_path_buf(),err))?;
		TopologyData::from_reader(BufReader::new(file)).map_err(|e|e.with_file(path.to_path_buf()))
	}
}

///Ids may be written either as strings or as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepresentation
{
	Text(String),
	Number(u64),
}

fn deserialize_id<'de,D:Deserializer<'de>>(deserializer:D) -> Result<NodeId,D::Error>
{
	Ok(match IdRepresentation::deserialize(deserializer)?
	{
		IdRepresentation::Text(text) => text,
		IdRepresentation::Number(number) => number.to_string(),
	})
}

fn deserialize_optional_id<'de,D:Deserializer<'de>>(deserializer:D) -> Result<Option<NodeId>,D::Error>
{
	Ok(match Option::<IdRepresentation>::deserialize(deserializer)?
	{
		Some(IdRepresentation::Text(text)) => if text.is_empty() { None } else { Some(text) },
		Some(IdRepresentation::Number(number)) => Some(number.to_string()),
		None => None,
	})
}

fn deserialize_optional_port<'de,D:Deserializer<'de>>(deserializer:D) -> Result<Option<PortIndex>,D::Error>
{
	Ok(match Option::<IdRepresentation>::deserialize(deserializer)?
	{
		Some(IdRepresentation::Text(text)) => text.trim().parse().ok(),
		Some(IdRepresentation::Number(number)) => Some(number as PortIndex),
		None => None,
	})
}

///Global values of the topology, taken from its description.
#[derive(Debug,Clone,Default)]
pub struct TopologyMetadata
{
	pub name: String,
	pub num_cores: usize,
	pub num_pods: usize,
	pub num_l1_l0: usize,
	pub num_l1_l2: usize,
	pub num_l2_l1: usize,
	pub num_l2_l3: usize,
	pub num_l3_l2: usize,
	///Number of elements in each level.
	pub level_sizes: [usize;NUM_LEVELS],
	///Core names and their dense identifier.
	pub core_names: BTreeMap<String,usize>,
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
enum ElementKind
{
	Node,
	Switch,
}

///The fat-tree. Built once by [Topology::load] and read-only afterwards.
///`Topology::default()` is an empty topology, whose derived counts are all 0.
#[derive(Debug,Default)]
pub struct Topology
{
	metadata: Option<TopologyMetadata>,
	nodes: BTreeMap<NodeId,Node>,
	switches: BTreeMap<NodeId,Switch>,
	lids: BTreeMap<Lid,(ElementKind,NodeId)>,
	names: BTreeMap<String,NodeId>,
	collisions: Vec<NodeId>,
}

impl Topology
{
	/**
	Build the topology from its description.
	Fails as ill-formed when
	* two elements share a lid,
	* two nodes or two switches share an id,
	* a switch level is outside 1..=3,
	* `num_cores` is not the number of distinct cores found on level 3.
	**/
	pub fn load(data:TopologyData) -> Result<Topology,Error>
	{
		let mut metadata = TopologyMetadata{
			name: data.name,
			num_cores: data.num_cores,
			num_pods: data.num_pods,
			num_l1_l0: data.num_l1_l0,
			num_l1_l2: data.num_l1_l2,
			num_l2_l1: data.num_l2_l1,
			num_l2_l3: data.num_l2_l3,
			num_l3_l2: data.num_l3_l2,
			level_sizes: [0;NUM_LEVELS],
			core_names: BTreeMap::new(),
		};
		let mut topology = Topology::default();
		for node in data.nodes
		{
			topology.register_lid(node.lid,ElementKind::Node,&node.id)?;
			if let Some(name) = node.desc.split_whitespace().next()
			{
				topology.names.insert(name.to_string(),node.id.clone());
			}
			let id = node.id.clone();
			let previous = topology.nodes.insert(id.clone(),Node{
				id: node.id,
				lid: node.lid,
				desc: node.desc,
				ports: node.ports,
			});
			if previous.is_some()
			{
				return Err(error!(ill_formed_topology).with_message(format!("node id {} appears twice",id)));
			}
		}
		metadata.level_sizes[0] = topology.nodes.len();
		let mut level3_cores = BTreeSet::new();
		for switch in data.switches
		{
			if switch.lvl<1 || switch.lvl>3
			{
				return Err(error!(ill_formed_topology).with_message(format!("switch {} has level {}, expected 1, 2 or 3",switch.id,switch.lvl)));
			}
			let level = switch.lvl as u8;
			topology.register_lid(switch.lid,ElementKind::Switch,&switch.id)?;
			metadata.level_sizes[level as usize] += 1;
			let coreid = match &switch.core
			{
				Some(core) =>
				{
					if level==3
					{
						level3_cores.insert(core.clone());
					}
					let next = metadata.core_names.len();
					Some(*metadata.core_names.entry(core.clone()).or_insert(next))
				},
				None => None,
			};
			let id = switch.id.clone();
			let previous = topology.switches.insert(id.clone(),Switch{
				id: switch.id,
				lid: switch.lid,
				desc: switch.desc,
				level,
				pod: switch.pod.filter(|pod|*pod>=0),
				core: switch.core,
				coreid,
				idx: switch.idx,
				ports: switch.ports,
			});
			if previous.is_some()
			{
				return Err(error!(ill_formed_topology).with_message(format!("switch id {} appears twice",id)));
			}
		}
		topology.collisions = topology.switches.keys().filter(|id|topology.nodes.contains_key(*id)).cloned().collect();
		if !topology.collisions.is_empty()
		{
			warn!("{} ids are used both by a node and a switch; lookups by id will return the switch. First one: {}",topology.collisions.len(),topology.collisions[0]);
		}
		info!("Topology {} loaded with {} nodes, {} switches and {} lids.",metadata.name,topology.nodes.len(),topology.switches.len(),topology.lids.len());
		if metadata.num_cores != level3_cores.len()
		{
			return Err(error!(ill_formed_topology).with_message(format!("expected {} cores, but found {}",metadata.num_cores,level3_cores.len())));
		}
		topology.metadata = Some(metadata);
		Ok(topology)
	}
	///Parse a JSON description and load it.
	pub fn from_reader<R:Read>(reader:R) -> Result<Topology,Error>
	{
		Topology::load(TopologyData::from_reader(reader)?)
	}
	pub fn from_file(path:&Path) -> Result<Topology,Error>
	{
		Topology::load(TopologyData::from_file(path)?)
	}
	fn register_lid(&mut self, lid:Lid, kind:ElementKind, id:&str) -> Result<(),Error>
	{
		if let Some((_,other)) = self.lids.get(&lid)
		{
			return Err(error!(ill_formed_topology).with_message(format!("lid {} is used by both {} and {}",lid,other,id)));
		}
		self.lids.insert(lid,(kind,id.to_string()));
		Ok(())
	}
	pub fn metadata(&self) -> Option<&TopologyMetadata>
	{
		self.metadata.as_ref()
	}
	pub fn is_loaded(&self) -> bool
	{
		self.metadata.is_some()
	}
	pub fn nodes(&self) -> impl Iterator<Item=&Node>
	{
		self.nodes.values()
	}
	pub fn switches(&self) -> impl Iterator<Item=&Switch>
	{
		self.switches.values()
	}
	pub fn node_by_id(&self, id:&str) -> Option<&Node>
	{
		self.nodes.get(id)
	}
	pub fn switch_by_id(&self, id:&str) -> Option<&Switch>
	{
		self.switches.get(id)
	}
	///Look for a switch and then for a node with the given id.
	///See [Topology::id_collisions] for the ids for which this is ambiguous.
	pub fn element_by_id(&self, id:&str) -> Option<Element<'_>>
	{
		if let Some(switch) = self.switches.get(id)
		{
			return Some(Element::Switch(switch));
		}
		self.nodes.get(id).map(Element::Node)
	}
	pub fn element_by_lid(&self, lid:Lid) -> Option<Element<'_>>
	{
		let (kind,id) = self.lids.get(&lid)?;
		match kind
		{
			ElementKind::Node => self.nodes.get(id).map(Element::Node),
			ElementKind::Switch => self.switches.get(id).map(Element::Switch),
		}
	}
	///The node whose description starts with `name`.
	pub fn node_by_name(&self, name:&str) -> Option<&Node>
	{
		self.names.get(name).and_then(|id|self.nodes.get(id))
	}
	///Ids used simultaneously by a node and a switch.
	pub fn id_collisions(&self) -> &[NodeId]
	{
		&self.collisions
	}
	///The element at the other end of a port, if the link is not broken and the far end exists.
	pub fn far_end(&self, port:&Port) -> Option<Element<'_>>
	{
		port.dest_node.as_deref().and_then(|id|self.element_by_id(id))
	}
	/**
	Check that every port reaches an existing element whose corresponding port points back.
	Returns the number of ports failing. They are only reported as warnings.
	**/
	pub fn check_consistency(&self) -> usize
	{
		let mut failing = 0;
		let elements = self.nodes.values().map(Element::Node).chain(self.switches.values().map(Element::Switch));
		for element in elements
		{
			for (offset,port) in element.ports().iter().enumerate()
			{
				let port_idx = offset+1;
				let dest_id = match &port.dest_node
				{
					Some(id) => id,
					None => continue,
				};
				let far = match self.element_by_id(dest_id)
				{
					Some(far) => far,
					None =>
					{
						warn!("port {} of {} goes to unknown element {}",port_idx,element,dest_id);
						failing += 1;
						continue;
					},
				};
				let back = port.dest_port.and_then(|dest_port|far.port(dest_port));
				let returns = match back
				{
					Some(back) => back.dest_node.as_deref()==Some(element.id()) && back.dest_port.map_or(true,|p|p==port_idx),
					None => false,
				};
				if !returns
				{
					warn!("port {} of {} goes to {} but it does not return",port_idx,element,far);
					failing += 1;
				}
			}
		}
		failing
	}

	pub fn num_levels(&self) -> usize
	{
		NUM_LEVELS
	}
	pub fn num_pods(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_pods)
	}
	pub fn num_cores(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_cores)
	}
	///Number of elements at `level`. Nodes are level 0.
	pub fn level_size(&self, level:usize) -> usize
	{
		match &self.metadata
		{
			Some(m) if level<NUM_LEVELS => m.level_sizes[level],
			_ => 0,
		}
	}
	pub fn l3_per_core(&self) -> usize
	{
		match &self.metadata
		{
			Some(m) if m.num_cores>0 => m.level_sizes[3]/m.num_cores,
			_ => 0,
		}
	}
	pub fn l2_per_core_per_pod(&self) -> usize
	{
		match &self.metadata
		{
			Some(m) if m.num_cores>0 && m.num_pods>0 => m.level_sizes[2]/m.num_pods/m.num_cores,
			_ => 0,
		}
	}
	///Ports from a node to level 1. A node has always a single uplink.
	pub fn l0_l1(&self) -> usize
	{
		if self.metadata.is_some() { 1 } else { 0 }
	}
	pub fn l1_l0(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_l1_l0)
	}
	pub fn l1_l2(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_l1_l2)
	}
	pub fn l2_l1(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_l2_l1)
	}
	pub fn l2_l3(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_l2_l3)
	}
	pub fn l3_l2(&self) -> usize
	{
		self.metadata.as_ref().map_or(0,|m|m.num_l3_l2)
	}
}
