/*!
Curves of the traffic along time.

For each timestamp the increases of all the resolved ports are classified by the pair of levels they join and by their direction. A link joining levels 1 and 2 belongs to the transition 1. Then the maximum and the mean of each class are taken.
*/

use std::fmt;

use log::info;

use crate::Timestamp;
use crate::topology::Topology;
use super::{FixedCounters,resolve,Endpoints,LinkType};

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Statistic
{
	Max,
	Mean,
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Direction
{
	Up,
	Down,
	Both,
}

///One curve of the summary.
#[derive(Debug,Clone,PartialEq)]
pub struct SummarySeries
{
	pub statistic: Statistic,
	///The lower level of the links considered, or `None` for all of them.
	pub transition: Option<u8>,
	pub direction: Direction,
	///One value per timestamp of the summary. `None` when no link is in the class at that time.
	pub values: Vec<Option<f64>>,
}

impl fmt::Display for SummarySeries
{
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result
	{
		let statistic = match self.statistic { Statistic::Max => "max", Statistic::Mean => "mean" };
		let direction = match self.direction { Direction::Up => "up", Direction::Down => "down", Direction::Both => "both" };
		match self.transition
		{
			Some(lower) => write!(f,"{}-L{}L{}-{}",statistic,lower,lower+1,direction),
			None => write!(f,"{}-any-{}",statistic,direction),
		}
	}
}

#[derive(Debug,Clone,Default,PartialEq)]
pub struct TimeSummary
{
	pub timestamps: Vec<Timestamp>,
	pub series: Vec<SummarySeries>,
}

impl TimeSummary
{
	pub fn series(&self, statistic:Statistic, transition:Option<u8>, direction:Direction) -> Option<&SummarySeries>
	{
		self.series.iter().find(|s|s.statistic==statistic && s.transition==transition && s.direction==direction)
	}
}

const NUM_TRANSITIONS: usize = 3;
const DIRECTIONS: [Direction;3] = [Direction::Up,Direction::Down,Direction::Both];

///Position of a class in the buckets: transitions first, the class of any transition last.
fn bucket(transition:Option<usize>, direction:usize) -> usize
{
	transition.unwrap_or(NUM_TRANSITIONS)*DIRECTIONS.len() + direction
}

fn statistics(values:&[f64]) -> (Option<f64>,Option<f64>)
{
	if values.is_empty()
	{
		return (None,None);
	}
	let max = values.iter().copied().fold(f64::NEG_INFINITY,f64::max);
	let mean = values.iter().sum::<f64>() / values.len() as f64;
	(Some(max),Some(mean))
}

///Build the max and mean curves of every transition and direction.
pub fn time_summary(counters:&FixedCounters, topology:&Topology) -> TimeSummary
{
	let num_buckets = (NUM_TRANSITIONS+1)*DIRECTIONS.len();
	let mut summary = TimeSummary::default();
	let mut maxima: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(counters.len());num_buckets];
	let mut means: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(counters.len());num_buckets];
	for (timestamp,records) in counters.tables_in(None)
	{
		let mut buckets: Vec<Vec<f64>> = vec![vec![];num_buckets];
		for record in records
		{
			let (from,to) = match resolve(topology,&record.node_id,record.port_idx)
			{
				Ok(Endpoints{nodefrom,nodeto:Some(nodeto),..}) => (nodefrom,nodeto),
				_ => continue,
			};
			let lower = from.level().min(to.level()) as usize;
			if lower >= NUM_TRANSITIONS
			{
				continue;
			}
			let direction = if LinkType::between(&from,&to)==LinkType::Up { 0 } else { 1 };
			for transition in [Some(lower),None]
			{
				buckets[bucket(transition,direction)].push(record.rcv_data);
				buckets[bucket(transition,2)].push(record.rcv_data);
			}
		}
		for (index,values) in buckets.iter().enumerate()
		{
			let (max,mean) = statistics(values);
			maxima[index].push(max);
			means[index].push(mean);
		}
		summary.timestamps.push(*timestamp);
	}
	for (statistic,curves) in [(Statistic::Max,maxima),(Statistic::Mean,means)]
	{
		for (index,values) in curves.into_iter().enumerate()
		{
			let transition = index / DIRECTIONS.len();
			summary.series.push(SummarySeries{
				statistic,
				transition: if transition<NUM_TRANSITIONS { Some(transition as u8) } else { None },
				direction: DIRECTIONS[index % DIRECTIONS.len()],
				values,
			});
		}
	}
	info!("Time summary of {} timestamps in {} series.",summary.timestamps.len(),summary.series.len());
	summary
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn buckets_are_distinct()
	{
		let mut seen = std::collections::BTreeSet::new();
		for transition in [Some(0),Some(1),Some(2),None]
		{
			for direction in 0..3
			{
				assert!(seen.insert(bucket(transition,direction)));
			}
		}
		assert_eq!(seen.len(),12);
		assert_eq!(seen.iter().next_back(),Some(&11));
	}

	#[test]
	fn statistics_of_values()
	{
		assert_eq!(statistics(&[]),(None,None));
		assert_eq!(statistics(&[1.0,5.0,3.0]),(Some(5.0),Some(3.0)));
	}

	#[test]
	fn series_names()
	{
		let series = SummarySeries{ statistic:Statistic::Mean, transition:Some(1), direction:Direction::Down, values:vec![] };
		assert_eq!(series.to_string(),"mean-L1L2-down");
	}
}
