/*!
Errors of the crate.

Every fallible function returns `Result<_,Error>`. Errors are built with the [error] macro, which records where in the sources they were created:

```ignore
let file = File::open(&path).map_err(|err|error!(could_not_open_file,path.to_path_buf(),err))?;
```

Problems on individual routes are not `Error`s but [RoutingError](crate::routing::finder::RoutingError), which are gathered by the route batches.
*/

use std::fmt::{self,Display,Formatter};
use std::path::PathBuf;

///Place in the sources where an error was generated.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub struct SourceLocation
{
	pub file: &'static str,
	pub line: u32,
	pub column: u32,
}

impl Display for SourceLocation
{
	fn fmt(&self, f:&mut Formatter<'_>) -> fmt::Result
	{
		write!(f,"{}:{}:{}",self.file,self.line,self.column)
	}
}

///Build a [SourceLocation] for the current position.
#[macro_export]
macro_rules! source_location
{
	() => {
		$crate::error::SourceLocation{ file:file!(), line:line!(), column:column!() }
	}
}

///Build an [Error] of the given kind at the current position.
///The kind is the name of one of the constructors of `Error`, such as `could_not_open_file`, followed by its arguments.
#[macro_export]
macro_rules! error
{
	($kind:ident) => {
		$crate::error::Error::$kind($crate::source_location!())
	};
	($kind:ident, $($args:expr),* $(,)?) => {
		$crate::error::Error::$kind($crate::source_location!(),$($args),*)
	};
}

#[derive(Debug)]
pub enum ErrorKind
{
	///The file could not be opened or read.
	CouldNotOpenFile{
		filepath: PathBuf,
		error: std::io::Error,
	},
	///The contents of a file do not follow its format.
	CouldNotParseFile{
		filepath: Option<PathBuf>,
		line: Option<usize>,
	},
	///The topology is structurally inconsistent. Loading it must be aborted.
	IllFormedTopology,
	///A set of jobs was selected that do not run at a common time.
	NoSharedTimeWindow,
	///A route was requested before selecting a routing table.
	NoActiveRoutingTable,
	///There is no data for the requested timestamp.
	UnknownTimestamp,
	///Some argument does not make sense.
	BadArgument,
	///Something went wrong that we do not classify further.
	Undetermined,
}

#[derive(Debug)]
pub struct Error
{
	pub source_location: SourceLocation,
	pub kind: ErrorKind,
	pub message: Option<String>,
}

impl Error
{
	pub fn new(source_location:SourceLocation, kind:ErrorKind) -> Error
	{
		Error{ source_location, kind, message:None }
	}
	///Append some text to the error. It is shown after the kind when printing.
	pub fn with_message(mut self, message:String) -> Error
	{
		self.message = match self.message
		{
			Some(previous) => Some(format!("{}\n{}",previous,message)),
			None => Some(message),
		};
		self
	}
	pub fn could_not_open_file(source_location:SourceLocation, filepath:PathBuf, error:std::io::Error) -> Error
	{
		Error::new(source_location,ErrorKind::CouldNotOpenFile{filepath,error})
	}
	pub fn could_not_parse_file(source_location:SourceLocation, filepath:Option<PathBuf>, line:Option<usize>) -> Error
	{
		Error::new(source_location,ErrorKind::CouldNotParseFile{filepath,line})
	}
	pub fn ill_formed_topology(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::IllFormedTopology)
	}
	pub fn no_shared_time_window(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::NoSharedTimeWindow)
	}
	pub fn no_active_routing_table(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::NoActiveRoutingTable)
	}
	pub fn unknown_timestamp(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::UnknownTimestamp)
	}
	pub fn bad_argument(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::BadArgument)
	}
	pub fn undetermined(source_location:SourceLocation) -> Error
	{
		Error::new(source_location,ErrorKind::Undetermined)
	}
	///Attach the path of the file being processed, if the kind has place for it and it is not already set.
	pub fn with_file(mut self, path:PathBuf) -> Error
	{
		if let ErrorKind::CouldNotParseFile{ref mut filepath,..} = self.kind
		{
			if filepath.is_none()
			{
				*filepath = Some(path);
			}
		}
		self
	}
}

impl Display for ErrorKind
{
	fn fmt(&self, f:&mut Formatter<'_>) -> fmt::Result
	{
		use ErrorKind::*;
		match self
		{
			CouldNotOpenFile{filepath,error} => write!(f,"could not open file {}: {}",filepath.display(),error),
			CouldNotParseFile{filepath,line} =>
			{
				write!(f,"could not parse file")?;
				if let Some(path) = filepath
				{
					write!(f," {}",path.display())?;
				}
				if let Some(line) = line
				{
					write!(f," at line {}",line)?;
				}
				Ok(())
			},
			IllFormedTopology => write!(f,"ill-formed topology"),
			NoSharedTimeWindow => write!(f,"the selected jobs do not share a time window"),
			NoActiveRoutingTable => write!(f,"there is no active routing table"),
			UnknownTimestamp => write!(f,"unknown timestamp"),
			BadArgument => write!(f,"bad argument"),
			Undetermined => write!(f,"undetermined error"),
		}
	}
}

impl Display for Error
{
	fn fmt(&self, f:&mut Formatter<'_>) -> fmt::Result
	{
		write!(f,"{} (at {})",self.kind,self.source_location)?;
		if let Some(message) = &self.message
		{
			write!(f,": {}",message)?;
		}
		Ok(())
	}
}

impl std::error::Error for Error
{
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)>
	{
		match &self.kind
		{
			ErrorKind::CouldNotOpenFile{error,..} => Some(error),
			_ => None,
		}
	}
}
