
use treescope_lib::terminal_main;

fn main()
{
	let args: Vec<String> = std::env::args().collect();
	if let Err(error) = terminal_main(&args)
	{
		eprintln!("treescope: {}",error);
		std::process::exit(-1);
	}
}
