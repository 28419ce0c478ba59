/*!
Completion of raw topology dumps.

A dump of the fabric lists nodes and switches with their ports, but switches lack level, pod, core and position. [preprocess] deduces them from the shape of the fat-tree:
* Levels are assigned breadth-first from the compute nodes. A switch reached from level `l` gets level `l+1` when its number of connected ports is the radix expected for that level. If some switch was skipped a backward pass from the top level fixes the remaining ones.
* Cores are the first token of the description of level 2 and 3 switches.
* Pods are propagated from each level-1 switch to the level-2 switches it reaches.
* Positions (`idx`) number the switches of each level after sorting them by pod, core and id.
*/

use std::collections::{BTreeMap,BTreeSet};

use log::info;
use serde::{Deserialize,Serialize};

use super::{TopologyData,NodeId};

///The global shape of the fat-tree, as given by the administrator.
#[derive(Debug,Clone,Default,PartialEq,Serialize,Deserialize)]
pub struct FatTreeShape
{
	#[serde(default)]
	pub name: String,
	pub num_cores: usize,
	pub num_pods: usize,
	#[serde(rename="num_L1L0")]
	pub num_l1_l0: usize,
	#[serde(rename="num_L1L2")]
	pub num_l1_l2: usize,
	#[serde(rename="num_L2L1")]
	pub num_l2_l1: usize,
	#[serde(rename="num_L2L3")]
	pub num_l2_l3: usize,
	#[serde(rename="num_L3L2")]
	pub num_l3_l2: usize,
}

impl FatTreeShape
{
	///Connected ports expected on an element of each level.
	pub fn radix(&self) -> [usize;4]
	{
		[1, self.num_l1_l0+self.num_l1_l2, self.num_l2_l1+self.num_l2_l3, self.num_l3_l2]
	}
}

///What [preprocess] found.
#[derive(Debug,Clone,Default,PartialEq)]
pub struct PreprocessReport
{
	///Switches at levels 1, 2 and 3.
	pub level_counts: [usize;3],
	///Level 1 and 2 switches in each pod.
	pub pod_counts: BTreeMap<i64,usize>,
	pub num_cores: usize,
	///Whether the forward pass skipped switches and the backward pass was required.
	pub backward_pass: bool,
}

///Assign `lvl`, `core`, `pod` and `idx` to every switch of `data`, and copy the `shape` into its global values.
pub fn preprocess(data:&mut TopologyData, shape:&FatTreeShape) -> PreprocessReport
{
	data.name = shape.name.clone();
	data.num_cores = shape.num_cores;
	data.num_pods = shape.num_pods;
	data.num_l1_l0 = shape.num_l1_l0;
	data.num_l1_l2 = shape.num_l1_l2;
	data.num_l2_l1 = shape.num_l2_l1;
	data.num_l2_l3 = shape.num_l2_l3;
	data.num_l3_l2 = shape.num_l3_l2;
	let mut report = PreprocessReport::default();
	report.backward_pass = assign_levels(data,&shape.radix());
	report.num_cores = assign_cores(data);
	assign_pods(data);
	assign_indices(data);
	for switch in data.switches.iter()
	{
		if (1..=3).contains(&switch.lvl)
		{
			report.level_counts[(switch.lvl-1) as usize] += 1;
		}
		if switch.lvl==1 || switch.lvl==2
		{
			if let Some(pod) = switch.pod
			{
				*report.pod_counts.entry(pod).or_insert(0) += 1;
			}
		}
	}
	info!("Preprocessed topology: switches by level {:?}, by pod {:?}, {} cores.",report.level_counts,report.pod_counts,report.num_cores);
	report
}

fn switch_positions(data:&TopologyData) -> BTreeMap<NodeId,usize>
{
	data.switches.iter().enumerate().map(|(index,switch)|(switch.id.clone(),index)).collect()
}

///Indices of the switches reached from the ports of the given switch or node ports.
fn neighbour_switches(ports:&[super::Port], positions:&BTreeMap<NodeId,usize>) -> Vec<usize>
{
	ports.iter().filter_map(|port|port.dest_node.as_ref().and_then(|id|positions.get(id).copied())).collect()
}

///Returns whether the backward pass was needed.
fn assign_levels(data:&mut TopologyData, radix:&[usize;4]) -> bool
{
	let positions = switch_positions(data);
	for switch in data.switches.iter_mut()
	{
		switch.lvl = -1;
	}
	let mut skipped = false;
	//The frontier starts with the neighbours of the nodes.
	let mut frontier: Vec<Vec<usize>> = data.nodes.iter().map(|node|neighbour_switches(&node.ports,&positions)).collect();
	let mut current: BTreeSet<usize> = BTreeSet::new();
	for level in 0..3
	{
		let mut next = BTreeSet::new();
		for neighbours in frontier.iter()
		{
			for &index in neighbours
			{
				let switch = &mut data.switches[index];
				if switch.lvl != -1
				{
					continue;
				}
				let connected = switch.ports.iter().filter(|port|port.dest_node.is_some()).count();
				if connected != radix[level+1]
				{
					skipped = true;
				}
				else
				{
					switch.lvl = (level+1) as i64;
					next.insert(index);
				}
			}
		}
		frontier = next.iter().map(|&index|neighbour_switches(&data.switches[index].ports,&positions)).collect();
		current = next;
	}
	if !skipped
	{
		return false;
	}
	for level in [3i64,2]
	{
		let mut next = BTreeSet::new();
		for &index in current.iter()
		{
			for neighbour in neighbour_switches(&data.switches[index].ports,&positions)
			{
				let switch = &mut data.switches[neighbour];
				if switch.lvl == level+1
				{
					continue;
				}
				if switch.lvl != level-1
				{
					switch.lvl = level-1;
				}
				next.insert(neighbour);
			}
		}
		current = next;
	}
	true
}

fn assign_cores(data:&mut TopologyData) -> usize
{
	let mut cores = BTreeSet::new();
	for switch in data.switches.iter_mut()
	{
		if switch.lvl==2 || switch.lvl==3
		{
			if let Some(core) = switch.desc.split(' ').next()
			{
				switch.core = Some(core.to_string());
				cores.insert(core.to_string());
			}
		}
	}
	cores.len()
}

fn assign_pods(data:&mut TopologyData)
{
	let positions = switch_positions(data);
	for switch in data.switches.iter_mut()
	{
		if switch.lvl==1 || switch.lvl==2
		{
			switch.pod = None;
		}
	}
	let mut next_pod = 0;
	for index in 0..data.switches.len()
	{
		if data.switches[index].lvl != 1
		{
			continue;
		}
		let neighbours = neighbour_switches(&data.switches[index].ports,&positions);
		let known = data.switches[index].pod.or_else(||neighbours.iter().find_map(|&n|data.switches[n].pod));
		let pod = match known
		{
			Some(pod) => pod,
			None =>
			{
				next_pod += 1;
				next_pod-1
			},
		};
		data.switches[index].pod = Some(pod);
		for neighbour in neighbours
		{
			data.switches[neighbour].pod = Some(pod);
		}
	}
}

fn assign_indices(data:&mut TopologyData)
{
	for level in 1..=3
	{
		let mut members: Vec<usize> = (0..data.switches.len()).filter(|&index|data.switches[index].lvl==level).collect();
		members.sort_by(|&a,&b|{
			let a = &data.switches[a];
			let b = &data.switches[b];
			let key_a = (if level==3 { None } else { a.pod }, if level==1 { None } else { a.core.as_ref() }, &a.id);
			let key_b = (if level==3 { None } else { b.pod }, if level==1 { None } else { b.core.as_ref() }, &b.id);
			key_a.cmp(&key_b)
		});
		for (idx,index) in members.into_iter().enumerate()
		{
			data.switches[index].idx = Some(idx);
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::topology::{NodeData,SwitchData,Port,Topology};

	fn switch(id:&str, lid:u32, desc:&str, ports:Vec<Port>) -> SwitchData
	{
		SwitchData{ id:id.to_string(), lid, desc:desc.to_string(), lvl:-1, pod:None, core:None, idx:None, ports }
	}

	///Two leaves, one spine, one core; a single pod.
	fn raw() -> TopologyData
	{
		let nodes = vec![
			NodeData{ id:"n0".to_string(), lid:1, desc:"n0 HCA".to_string(), ports:vec![Port::to("leaf0",1)] },
			NodeData{ id:"n1".to_string(), lid:2, desc:"n1 HCA".to_string(), ports:vec![Port::to("leaf1",1)] },
		];
		let switches = vec![
			switch("core",30,"spineA core-switch",vec![Port::to("spine",2)]),
			switch("spine",20,"spineA mid",vec![Port::to("leaf0",2),Port::to("leaf1",2),Port::to("core",1)]),
			switch("leaf0",10,"leaf",vec![Port::to("n0",1),Port::to("spine",1)]),
			switch("leaf1",11,"leaf",vec![Port::to("n1",1),Port::to("spine",2),Port::broken()]),
		];
		TopologyData{ nodes, switches, ..TopologyData::default() }
	}

	fn shape() -> FatTreeShape
	{
		FatTreeShape{ name:"raw".to_string(), num_cores:1, num_pods:1, num_l1_l0:1, num_l1_l2:1, num_l2_l1:2, num_l2_l3:1, num_l3_l2:1 }
	}

	#[test]
	fn levels_pods_and_cores()
	{
		let mut data = raw();
		let report = preprocess(&mut data,&shape());
		assert!(!report.backward_pass);
		assert_eq!(report.level_counts,[2,1,1]);
		assert_eq!(report.num_cores,1);
		let levels: Vec<i64> = data.switches.iter().map(|s|s.lvl).collect();
		assert_eq!(levels,vec![3,2,1,1]);
		assert_eq!(data.switches[2].pod,Some(0));
		assert_eq!(data.switches[1].pod,Some(0));
		assert_eq!(data.switches[0].core.as_deref(),Some("spineA"));
		assert_eq!(data.switches[2].idx,Some(0));
		assert_eq!(data.switches[3].idx,Some(1));
		let topology = Topology::load(data).expect("preprocessed topology loads");
		assert_eq!(topology.level_size(1),2);
		assert_eq!(topology.num_cores(),1);
	}
}
