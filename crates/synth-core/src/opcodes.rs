//! Opcode constants and stack arities.

// ============================================================
// Opcode constants
// ============================================================

pub mod opcode {
  pub const STOP: u8 = 0x00;
  pub const ADD: u8 = 0x01;
  pub const MUL: u8 = 0x02;
  pub const SUB: u8 = 0x03;
  pub const DIV: u8 = 0x04;
  pub const SDIV: u8 = 0x05;
  pub const MOD: u8 = 0x06;
  pub const SMOD: u8 = 0x07;
  pub const ADDMOD: u8 = 0x08;
  pub const MULMOD: u8 = 0x09;
  pub const EXP: u8 = 0x0a;
  pub const SIGNEXTEND: u8 = 0x0b;
  pub const LT: u8 = 0x10;
  pub const GT: u8 = 0x11;
  pub const SLT: u8 = 0x12;
  pub const SGT: u8 = 0x13;
  pub const EQ: u8 = 0x14;
  pub const ISZERO: u8 = 0x15;
  pub const AND: u8 = 0x16;
  pub const OR: u8 = 0x17;
  pub const XOR: u8 = 0x18;
  pub const NOT: u8 = 0x19;
  pub const BYTE: u8 = 0x1a;
  pub const SHL: u8 = 0x1b;
  pub const SHR: u8 = 0x1c;
  pub const SAR: u8 = 0x1d;
  pub const KECCAK256: u8 = 0x20;
  pub const ADDRESS: u8 = 0x30;
  pub const BALANCE: u8 = 0x31;
  pub const ORIGIN: u8 = 0x32;
  pub const CALLER: u8 = 0x33;
  pub const CALLVALUE: u8 = 0x34;
  pub const CALLDATALOAD: u8 = 0x35;
  pub const CALLDATASIZE: u8 = 0x36;
  pub const CALLDATACOPY: u8 = 0x37;
  pub const CODESIZE: u8 = 0x38;
  pub const CODECOPY: u8 = 0x39;
  pub const GASPRICE: u8 = 0x3a;
  pub const EXTCODESIZE: u8 = 0x3b;
  pub const EXTCODECOPY: u8 = 0x3c;
  pub const RETURNDATASIZE: u8 = 0x3d;
  pub const RETURNDATACOPY: u8 = 0x3e;
  pub const EXTCODEHASH: u8 = 0x3f;
  pub const BLOCKHASH: u8 = 0x40;
  pub const COINBASE: u8 = 0x41;
  pub const TIMESTAMP: u8 = 0x42;
  pub const NUMBER: u8 = 0x43;
  pub const PREVRANDAO: u8 = 0x44;
  pub const GASLIMIT: u8 = 0x45;
  pub const CHAINID: u8 = 0x46;
  pub const SELFBALANCE: u8 = 0x47;
  pub const BASEFEE: u8 = 0x48;
  pub const BLOBHASH: u8 = 0x49;
  pub const BLOBBASEFEE: u8 = 0x4a;
  pub const POP: u8 = 0x50;
  pub const MLOAD: u8 = 0x51;
  pub const MSTORE: u8 = 0x52;
  pub const MSTORE8: u8 = 0x53;
  pub const SLOAD: u8 = 0x54;
  pub const SSTORE: u8 = 0x55;
  pub const JUMP: u8 = 0x56;
  pub const JUMPI: u8 = 0x57;
  pub const PC: u8 = 0x58;
  pub const MSIZE: u8 = 0x59;
  pub const GAS: u8 = 0x5a;
  pub const JUMPDEST: u8 = 0x5b;
  pub const TLOAD: u8 = 0x5c;
  pub const TSTORE: u8 = 0x5d;
  pub const MCOPY: u8 = 0x5e;
  pub const PUSH0: u8 = 0x5f;
  pub const PUSH1: u8 = 0x60;
  pub const PUSH32: u8 = 0x7f;
  pub const DUP1: u8 = 0x80;
  pub const DUP16: u8 = 0x8f;
  pub const SWAP1: u8 = 0x90;
  pub const SWAP16: u8 = 0x9f;
  pub const LOG0: u8 = 0xa0;
  pub const LOG4: u8 = 0xa4;
  pub const CREATE: u8 = 0xf0;
  pub const CALL: u8 = 0xf1;
  pub const CALLCODE: u8 = 0xf2;
  pub const RETURN: u8 = 0xf3;
  pub const DELEGATECALL: u8 = 0xf4;
  pub const CREATE2: u8 = 0xf5;
  pub const STATICCALL: u8 = 0xfa;
  pub const REVERT: u8 = 0xfd;
  pub const INVALID: u8 = 0xfe;
  pub const SELFDESTRUCT: u8 = 0xff;
}

// ============================================================
// Number of stack inputs/outputs per opcode
// ============================================================

/// How many values this opcode pops from the stack.
pub fn opcode_input_count(op: u8) -> usize {
  use opcode::*;
  match op {
    STOP | JUMPDEST | PC | MSIZE | GAS | INVALID => 0,
    ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
    | RETURNDATASIZE => 0,
    COINBASE | TIMESTAMP | NUMBER | PREVRANDAO | GASLIMIT | CHAINID | SELFBALANCE | BASEFEE
    | BLOBBASEFEE => 0,
    ISZERO | NOT | BALANCE | CALLDATALOAD | EXTCODESIZE | EXTCODEHASH | BLOCKHASH | BLOBHASH
    | POP | MLOAD | SLOAD | JUMP | TLOAD | SELFDESTRUCT => 1,
    ADD | MUL | SUB | DIV | SDIV | MOD | SMOD | EXP | SIGNEXTEND | LT | GT | SLT | SGT | EQ
    | AND | OR | XOR | BYTE | SHL | SHR | SAR | KECCAK256 => 2,
    MSTORE | MSTORE8 | SSTORE | JUMPI | TSTORE | RETURN | REVERT => 2,
    ADDMOD | MULMOD | CALLDATACOPY | CODECOPY | RETURNDATACOPY | MCOPY | CREATE => 3,
    EXTCODECOPY | CREATE2 => 4,
    DELEGATECALL | STATICCALL => 6,
    CALL | CALLCODE => 7,
    op if (PUSH0..=PUSH32).contains(&op) => 0,
    op if (DUP1..=DUP16).contains(&op) => (op - DUP1 + 1) as usize,
    op if (SWAP1..=SWAP16).contains(&op) => (op - SWAP1 + 2) as usize,
    op if (LOG0..=LOG4).contains(&op) => (op - LOG0 + 2) as usize,
    _ => 0,
  }
}

/// How many values this opcode pushes onto the stack.
pub fn opcode_output_count(op: u8) -> usize {
  use opcode::*;
  match op {
    STOP | CALLDATACOPY | CODECOPY | EXTCODECOPY | RETURNDATACOPY | POP | MSTORE | MSTORE8
    | SSTORE | JUMP | JUMPI | JUMPDEST | TSTORE | MCOPY | RETURN | REVERT | INVALID
    | SELFDESTRUCT => 0,
    op if (LOG0..=LOG4).contains(&op) => 0,
    op if (DUP1..=DUP16).contains(&op) => (op - DUP1 + 2) as usize,
    op if (SWAP1..=SWAP16).contains(&op) => (op - SWAP1 + 2) as usize,
    _ => 1,
  }
}

pub fn is_call(op: u8) -> bool {
  matches!(
    op,
    opcode::CALL | opcode::CALLCODE | opcode::DELEGATECALL | opcode::STATICCALL
  )
}

/// Opcodes whose handlers need the interpreter's memory.
pub fn reads_memory(op: u8) -> bool {
  use opcode::*;
  is_call(op)
    || matches!(
      op,
      MLOAD | MSTORE | MSTORE8 | MCOPY | KECCAK256 | RETURN | REVERT | CALLDATACOPY | CODECOPY
        | EXTCODECOPY | RETURNDATACOPY
    )
    || (LOG0..=LOG4).contains(&op)
}

pub fn opcode_name(op: u8) -> String {
  use opcode::*;
  let name = match op {
    STOP => "STOP",
    KECCAK256 => "KECCAK256",
    ADDRESS => "ADDRESS",
    BALANCE => "BALANCE",
    ORIGIN => "ORIGIN",
    CALLER => "CALLER",
    CALLVALUE => "CALLVALUE",
    CALLDATALOAD => "CALLDATALOAD",
    CALLDATASIZE => "CALLDATASIZE",
    CALLDATACOPY => "CALLDATACOPY",
    CODESIZE => "CODESIZE",
    CODECOPY => "CODECOPY",
    GASPRICE => "GASPRICE",
    EXTCODESIZE => "EXTCODESIZE",
    EXTCODECOPY => "EXTCODECOPY",
    RETURNDATASIZE => "RETURNDATASIZE",
    RETURNDATACOPY => "RETURNDATACOPY",
    EXTCODEHASH => "EXTCODEHASH",
    BLOCKHASH => "BLOCKHASH",
    COINBASE => "COINBASE",
    TIMESTAMP => "TIMESTAMP",
    NUMBER => "NUMBER",
    PREVRANDAO => "PREVRANDAO",
    GASLIMIT => "GASLIMIT",
    CHAINID => "CHAINID",
    SELFBALANCE => "SELFBALANCE",
    BASEFEE => "BASEFEE",
    BLOBHASH => "BLOBHASH",
    BLOBBASEFEE => "BLOBBASEFEE",
    POP => "POP",
    MLOAD => "MLOAD",
    MSTORE => "MSTORE",
    MSTORE8 => "MSTORE8",
    SLOAD => "SLOAD",
    SSTORE => "SSTORE",
    JUMP => "JUMP",
    JUMPI => "JUMPI",
    PC => "PC",
    MSIZE => "MSIZE",
    GAS => "GAS",
    JUMPDEST => "JUMPDEST",
    TLOAD => "TLOAD",
    TSTORE => "TSTORE",
    MCOPY => "MCOPY",
    PUSH0 => "PUSH0",
    CREATE => "CREATE",
    CALL => "CALL",
    CALLCODE => "CALLCODE",
    RETURN => "RETURN",
    DELEGATECALL => "DELEGATECALL",
    CREATE2 => "CREATE2",
    STATICCALL => "STATICCALL",
    REVERT => "REVERT",
    INVALID => "INVALID",
    SELFDESTRUCT => "SELFDESTRUCT",
    op if (PUSH1..=PUSH32).contains(&op) => return format!("PUSH{}", op - PUSH1 + 1),
    op if (DUP1..=DUP16).contains(&op) => return format!("DUP{}", op - DUP1 + 1),
    op if (SWAP1..=SWAP16).contains(&op) => return format!("SWAP{}", op - SWAP1 + 1),
    op if (LOG0..=LOG4).contains(&op) => return format!("LOG{}", op - LOG0),
    op => match crate::operations::ArithOp::from_opcode(op) {
      Some(arith) => arith.name(),
      None => return format!("UNKNOWN({op:#04x})"),
    },
  };
  name.to_string()
}
