/// The closed set of knobs a build front end may pass to the compiler.
#[derive(Debug, Clone, Default)]
pub struct CompileSettings {
	/// Freeze the platform prefix into a kernel snapshot so later programs
	/// can reuse the flashed base image.
	pub create_kernel_for_flashing: bool,
	/// Launch the uploaded program from flash at boot instead of waiting for
	/// an execute command.
	pub launch_program_from_flash: bool,
	/// Commit the user program to flash, not just the kernel.
	pub use_flash_for_program: bool,
	/// Restart the program after a device reset.
	pub auto_restart_program: bool,
	/// Full names of types the execution set must never admit, on top of the
	/// built-in suppression list.
	pub additional_suppressions: Vec<String>,
}
