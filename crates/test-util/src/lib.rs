//! Test builder for compiling and natively executing one IR function.
//!
//! # Example
//!
//! ```ignore
//! use ir_builder::UnitBuilder;
//! use test_util::IrFnTest;
//!
//! let mut ub = UnitBuilder::new();
//! let mut fb = ub.declare_function("add_one", 1);
//! let entry = fb.append_block();
//! let arg0 = fb.argument(0);
//! let one = fb.constant(1);
//! let result = fb.new_virtual();
//! {
//!     let mut bb = fb.block_builder(entry);
//!     bb.add(result, arg0, one);
//!     bb.ret(Some(result));
//! }
//! let unit = ub.finish();
//! let target = unit.find_function("add_one").unwrap();
//!
//! IrFnTest::new(unit, target).with_args(&[41]).expect_return(42);
//! ```

use std::ffi::c_void;

use ir::{FunctionId, InstKind, Unit, Value};

/// Builder for compiling one already-built IR function and executing it
/// with concrete integer arguments.
///
/// Because this backend targets the System V AMD64 ABI, the machine code it
/// emits for a function *is already* an `extern "C"` function with that
/// function's arity -- no interpreter loop or syscall trampoline is needed
/// to invoke it, unlike a cross-architecture backend running under
/// emulation. What still needs wrapping is the call itself: [`run`] builds
/// a tiny bootstrap function around the target that loads each argument as
/// a literal and calls it, so the full pipeline (copy insertion, register
/// allocation, and the Call lowering in particular) is exercised exactly
/// the way a real caller would exercise it, rather than jumping straight
/// into the target function through a raw pointer.
///
/// [`run`]: IrFnTest::run
pub struct IrFnTest {
    unit: Unit,
    target: FunctionId,
    args: Vec<i64>,
    debug_enabled: bool,
}

impl IrFnTest {
    /// Build a test around `target`, a function already defined in `unit`.
    pub fn new(unit: Unit, target: FunctionId) -> Self {
        Self { unit, target, args: Vec::new(), debug_enabled: false }
    }

    /// Set the integer arguments the target function is called with.
    pub fn with_args(mut self, args: &[i64]) -> Self {
        self.args = args.to_vec();
        self
    }

    /// Print the compiled instruction and byte counts before running.
    pub fn debug(mut self, enable: bool) -> Self {
        self.debug_enabled = enable;
        self
    }

    /// Compile, execute, and assert the target function returns `expected`.
    pub fn expect_return(self, expected: i64) {
        let actual = self.run();
        assert_eq!(actual, expected, "target function returned an unexpected value");
    }

    /// Compile and execute, returning whatever the target function returned.
    ///
    /// # Panics
    ///
    /// Panics if any pipeline stage fails. Every failure this backend can
    /// report is a programmer error (malformed IR, an unresolved virtual
    /// register, an out-of-range encoding), not something a test harness
    /// should swallow.
    pub fn run(mut self) -> i64 {
        self.build_bootstrap();

        x64_backend::insert_copies(&mut self.unit).unwrap_or_else(|e| panic!("copy insertion: {e}"));
        x64_backend::register_allocate(&mut self.unit)
            .unwrap_or_else(|e| panic!("register allocation: {e}"));
        let program = x64_backend::select_and_compile(&self.unit)
            .unwrap_or_else(|e| panic!("instruction selection: {e}"));
        let bytes = x64_backend::encode(&program).unwrap_or_else(|e| panic!("encoding: {e}"));

        if self.debug_enabled {
            eprintln!("compiled {} machine instructions, {} bytes", program.insts.len(), bytes.len());
        }

        // function_entry gives a byte offset directly: every branch/call in
        // the stream was already resolved relative to the whole program.
        let entry = *program
            .function_entry
            .get("__ir_fn_test_bootstrap")
            .expect("bootstrap function was compiled");

        unsafe { run_mapped(&bytes, entry) }
    }

    /// Append a zero-argument function that loads each of `self.args` as a
    /// literal and calls `self.target`, returning its result. This is the
    /// entry point actually invoked.
    fn build_bootstrap(&mut self) {
        let target_name = self.unit.function(self.target).name().to_string();
        let bootstrap = self.unit.append_function("__ir_fn_test_bootstrap", 0);
        let block = self.unit.function_mut(bootstrap).append_block();

        let arg_values: Vec<Value> = self.args.iter().map(|&a| self.unit.constant(a)).collect();
        let result = self.unit.new_virtual();
        self.unit.append_inst(
            bootstrap,
            block,
            InstKind::Call { callee: target_name, args: arg_values, result },
        );
        self.unit.append_inst(bootstrap, block, InstKind::Ret { value: Some(result) });
    }
}

unsafe fn run_mapped(bytes: &[u8], entry: usize) -> i64 {
    let len = bytes.len();
    let map = libc::mmap(
        core::ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    assert_ne!(map, libc::MAP_FAILED, "mmap failed for {len} executable bytes");

    core::ptr::copy_nonoverlapping(bytes.as_ptr(), map as *mut u8, len);

    let func_ptr = (map as *const u8).add(entry);
    let func: extern "C" fn() -> i64 = core::mem::transmute(func_ptr);
    let result = func();

    libc::munmap(map as *mut c_void, len);
    result
}
