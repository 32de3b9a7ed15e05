//! x86-64 instruction encoder
//!
//! Every instruction the code generator needs is one [`Opcode`] plus a register
//! field and an r/m operand. Memory operands come in three shapes:
//!
//! ```text
//! Global(offset)   [rip + disp32]   mod=00 rm=101, disp resolved by a Relocation
//! Local(offset)    [rsi + disp32]   mod=10 rm=110
//! Indirect(reg)    [reg]            mod=00 rm=reg
//! ```
//!
//! Register ids are always below 8, so the only REX prefix ever emitted is REX.W.

use crate::error::{Error, Result};

/// Register ids
pub mod reg {
    /// eax / rax / xmm0
    pub const EAX: u8 = 0;
    /// ecx / rcx
    pub const ECX: u8 = 1;
    /// edx / rdx
    pub const EDX: u8 = 2;
    /// esi / rsi, the local memory base
    pub const ESI: u8 = 6;
    /// edi / rdi
    pub const EDI: u8 = 7;

    const NAMES32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
    const NAMES64: [&str; 8] = ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi"];

    /// 32-bit register name
    pub fn name32(id: u8) -> &'static str {
        NAMES32[(id & 7) as usize]
    }

    /// 64-bit register name
    pub fn name64(id: u8) -> &'static str {
        NAMES64[(id & 7) as usize]
    }
}

/// Opcode bytes and how to prefix them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    /// Mnemonic used in listings
    pub mnemonic: &'static str,
    /// Mandatory prefix (66, F2 or F3), emitted before REX
    pub prefix: Option<u8>,
    /// 64-bit operand size
    pub rex_w: bool,
    /// Opcode bytes
    pub bytes: &'static [u8],
    /// Fixed ModRM reg field for group opcodes (`/digit`)
    pub extension: Option<u8>,
}

impl Opcode {
    const fn new(mnemonic: &'static str, prefix: Option<u8>, bytes: &'static [u8]) -> Self {
        Opcode {
            mnemonic,
            prefix,
            rex_w: false,
            bytes,
            extension: None,
        }
    }

    const fn wide(mut self) -> Self {
        self.rex_w = true;
        self
    }

    const fn digit(mut self, extension: u8) -> Self {
        self.extension = Some(extension);
        self
    }
}

/// The opcodes the code generator emits
pub mod op {
    use super::Opcode;

    // General purpose moves and arithmetic
    /// mov r32, r/m32
    pub const MOV_LOAD: Opcode = Opcode::new("mov", None, &[0x8B]);
    /// mov r/m32, r32
    pub const MOV_STORE: Opcode = Opcode::new("mov", None, &[0x89]);
    /// mov r/m32, imm32
    pub const MOV_IMM: Opcode = Opcode::new("mov", None, &[0xC7]).digit(0);
    /// add r32, r/m32
    pub const ADD: Opcode = Opcode::new("add", None, &[0x03]);
    /// sub r32, r/m32
    pub const SUB: Opcode = Opcode::new("sub", None, &[0x2B]);
    /// imul r32, r/m32
    pub const IMUL: Opcode = Opcode::new("imul", None, &[0x0F, 0xAF]);
    /// neg r/m32
    pub const NEG: Opcode = Opcode::new("neg", None, &[0xF7]).digit(3);
    /// idiv r/m32
    pub const IDIV: Opcode = Opcode::new("idiv", None, &[0xF7]).digit(7);
    /// xor r/m32, imm8
    pub const XOR_IMM8: Opcode = Opcode::new("xor", None, &[0x83]).digit(6);
    /// cmp r/m32, imm8
    pub const CMP_IMM8: Opcode = Opcode::new("cmp", None, &[0x83]).digit(7);
    /// cmp r32, r/m32
    pub const CMP_LOAD: Opcode = Opcode::new("cmp", None, &[0x3B]);
    /// cmp r/m32, r32
    pub const CMP_STORE: Opcode = Opcode::new("cmp", None, &[0x39]);

    // Address arithmetic
    /// lea r64, m
    pub const LEA: Opcode = Opcode::new("lea", None, &[0x8D]).wide();
    /// movsxd r64, r/m32
    pub const MOVSXD: Opcode = Opcode::new("movsxd", None, &[0x63]).wide();
    /// imul r64, r/m64, imm32
    pub const IMUL_IMM64: Opcode = Opcode::new("imul", None, &[0x69]).wide();
    /// add r64, r/m64
    pub const ADD64: Opcode = Opcode::new("add", None, &[0x03]).wide();
    /// add r/m64, imm32
    pub const ADD_IMM64: Opcode = Opcode::new("add", None, &[0x81]).wide().digit(0);

    // Scalar SSE
    /// movss xmm, xmm/m32
    pub const MOVSS_LOAD: Opcode = Opcode::new("movss", Some(0xF3), &[0x0F, 0x10]);
    /// movss xmm/m32, xmm
    pub const MOVSS_STORE: Opcode = Opcode::new("movss", Some(0xF3), &[0x0F, 0x11]);
    /// addss
    pub const ADDSS: Opcode = Opcode::new("addss", Some(0xF3), &[0x0F, 0x58]);
    /// subss
    pub const SUBSS: Opcode = Opcode::new("subss", Some(0xF3), &[0x0F, 0x5C]);
    /// mulss
    pub const MULSS: Opcode = Opcode::new("mulss", Some(0xF3), &[0x0F, 0x59]);
    /// divss
    pub const DIVSS: Opcode = Opcode::new("divss", Some(0xF3), &[0x0F, 0x5E]);
    /// maxss
    pub const MAXSS: Opcode = Opcode::new("maxss", Some(0xF3), &[0x0F, 0x5F]);
    /// sqrtss
    pub const SQRTSS: Opcode = Opcode::new("sqrtss", Some(0xF3), &[0x0F, 0x51]);
    /// cvtsi2ss xmm, r/m32
    pub const CVTSI2SS: Opcode = Opcode::new("cvtsi2ss", Some(0xF3), &[0x0F, 0x2A]);
    /// cvttss2si r32, xmm/m32
    pub const CVTTSS2SI: Opcode = Opcode::new("cvttss2si", Some(0xF3), &[0x0F, 0x2C]);
    /// comiss xmm, xmm/m32
    pub const COMISS: Opcode = Opcode::new("comiss", None, &[0x0F, 0x2F]);

    // Packed SSE
    /// movups xmm, xmm/m128
    pub const MOVUPS_LOAD: Opcode = Opcode::new("movups", None, &[0x0F, 0x10]);
    /// movups xmm/m128, xmm
    pub const MOVUPS_STORE: Opcode = Opcode::new("movups", None, &[0x0F, 0x11]);
    /// addps
    pub const ADDPS: Opcode = Opcode::new("addps", None, &[0x0F, 0x58]);
    /// subps
    pub const SUBPS: Opcode = Opcode::new("subps", None, &[0x0F, 0x5C]);
    /// mulps
    pub const MULPS: Opcode = Opcode::new("mulps", None, &[0x0F, 0x59]);
    /// rsqrtps
    pub const RSQRTPS: Opcode = Opcode::new("rsqrtps", None, &[0x0F, 0x52]);
    /// andps
    pub const ANDPS: Opcode = Opcode::new("andps", None, &[0x0F, 0x54]);
    /// orps
    pub const ORPS: Opcode = Opcode::new("orps", None, &[0x0F, 0x56]);
    /// xorps
    pub const XORPS: Opcode = Opcode::new("xorps", None, &[0x0F, 0x57]);
    /// shufps xmm, xmm/m128, imm8
    pub const SHUFPS: Opcode = Opcode::new("shufps", None, &[0x0F, 0xC6]);
    /// haddps (SSE3)
    pub const HADDPS: Opcode = Opcode::new("haddps", Some(0xF2), &[0x0F, 0x7C]);
    /// psrldq xmm, imm8
    pub const PSRLDQ: Opcode = Opcode::new("psrldq", Some(0x66), &[0x0F, 0x73]).digit(3);
    /// pslldq xmm, imm8
    pub const PSLLDQ: Opcode = Opcode::new("pslldq", Some(0x66), &[0x0F, 0x73]).digit(7);
}

/// r/m operand of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Register, mod=11
    Register(u8),
    /// Byte offset in the object, addressed RIP-relative
    Global(u32),
    /// Byte offset from rsi
    Local(u32),
    /// Address held in a register
    Indirect(u8),
}

/// Conditional jump kinds, valued by the second byte of their rel32 form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    /// jb
    Below = 0x82,
    /// jae
    AboveEqual = 0x83,
    /// je
    Equal = 0x84,
    /// jne
    NotEqual = 0x85,
    /// jbe
    BelowEqual = 0x86,
    /// ja
    Above = 0x87,
    /// jl
    Less = 0x8C,
    /// jge
    GreaterEqual = 0x8D,
    /// jle
    LessEqual = 0x8E,
    /// jg
    Greater = 0x8F,
}

impl Condition {
    /// Jump mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::Below => "jb",
            Condition::AboveEqual => "jae",
            Condition::Equal => "je",
            Condition::NotEqual => "jne",
            Condition::BelowEqual => "jbe",
            Condition::Above => "ja",
            Condition::Less => "jl",
            Condition::GreaterEqual => "jge",
            Condition::LessEqual => "jle",
            Condition::Greater => "jg",
        }
    }
}

/// A displacement to resolve once the function and the global region are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the disp32 in the function's code
    pub position: usize,
    /// Object offset the instruction addresses
    pub target: u32,
    /// Offset of the next instruction, which RIP-relative addressing counts from
    pub next_ip: usize,
}

/// A jump displacement to fill in once its target is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PatchSite {
    position: usize,
    width: usize,
    label: usize,
}

/// Machine code for one function, with its listing
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    relocations: Vec<Relocation>,
    listing: Vec<String>,
    keep_listing: bool,
    labels: usize,
}

impl CodeBuffer {
    /// Empty buffer; `keep_listing` records one text line per instruction
    pub fn new(keep_listing: bool) -> Self {
        CodeBuffer {
            keep_listing,
            ..Default::default()
        }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Encodes `opcode` with ModRM built from `reg` and `rm`, followed by `imm`
    pub fn encode(&mut self, opcode: &Opcode, reg: u8, rm: Operand, imm: &[u8], text: impl FnOnce() -> String) {
        let reg = opcode.extension.unwrap_or(reg) & 7;

        if let Some(prefix) = opcode.prefix {
            self.code.push(prefix);
        }
        if opcode.rex_w {
            self.code.push(0x48);
        }
        self.code.extend_from_slice(opcode.bytes);

        match rm {
            Operand::Register(r) => self.code.push(0xC0 | (reg << 3) | (r & 7)),
            Operand::Indirect(r) => self.code.push((reg << 3) | (r & 7)),
            Operand::Local(offset) => {
                self.code.push(0x80 | (reg << 3) | reg::ESI);
                self.code.extend_from_slice(&offset.to_le_bytes());
            }
            Operand::Global(target) => {
                self.code.push((reg << 3) | 0x05);
                let position = self.code.len();
                self.code.extend_from_slice(&[0; 4]);
                self.relocations.push(Relocation {
                    position,
                    target,
                    next_ip: position + 4 + imm.len(),
                });
            }
        }

        self.code.extend_from_slice(imm);
        self.note(text);
    }

    /// Appends raw bytes as one instruction
    pub fn raw(&mut self, bytes: &[u8], text: &str) {
        self.code.extend_from_slice(bytes);
        self.note(|| text.to_string());
    }

    /// `ret`
    pub fn ret(&mut self) {
        self.raw(&[0xC3], "ret");
    }

    /// `cdq`
    pub fn cdq(&mut self) {
        self.raw(&[0x99], "cdq");
    }

    /// `call rel32` with a zero displacement; returns the offset of the displacement
    pub fn call_placeholder(&mut self, target: &str) -> usize {
        self.code.push(0xE8);
        let position = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        self.note(|| format!("call {}", target));
        position
    }

    /// `jcc rel32` to a label bound later
    pub fn jump_if(&mut self, condition: Condition) -> PatchSite {
        let label = self.next_label();
        self.code.extend_from_slice(&[0x0F, condition as u8]);
        self.placeholder(4, label, condition.mnemonic())
    }

    /// `jmp rel32` to a label bound later
    pub fn jump(&mut self) -> PatchSite {
        let label = self.next_label();
        self.code.push(0xE9);
        self.placeholder(4, label, "jmp")
    }

    /// `jcc rel8` to a label bound later
    pub fn short_jump_if(&mut self, condition: Condition) -> PatchSite {
        let label = self.next_label();
        self.code.push(condition as u8 - 0x10);
        self.placeholder(1, label, condition.mnemonic())
    }

    /// Points a pending jump at the current position
    pub fn bind(&mut self, site: PatchSite) -> Result<()> {
        let from = site.position + site.width;
        let distance = self.code.len() as i64 - from as i64;

        match site.width {
            1 => {
                let rel = i8::try_from(distance).map_err(|_| Error::Layout {
                    message: format!("short jump distance {} out of range", distance),
                })?;
                self.code[site.position] = rel as u8;
            }
            _ => {
                let rel = i32::try_from(distance).map_err(|_| Error::Layout {
                    message: format!("jump distance {} out of range", distance),
                })?;
                self.code[site.position..site.position + 4].copy_from_slice(&rel.to_le_bytes());
            }
        }

        let label = site.label;
        self.note(|| format!(".L{}:", label));
        Ok(())
    }

    /// Emitted bytes
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Pending RIP-relative displacements
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Recorded listing
    pub fn listing(&self) -> &[String] {
        &self.listing
    }

    /// Consumes the buffer
    pub fn finish(self) -> (Vec<u8>, Vec<Relocation>, Vec<String>) {
        (self.code, self.relocations, self.listing)
    }

    fn placeholder(&mut self, width: usize, label: usize, mnemonic: &str) -> PatchSite {
        let position = self.code.len();
        self.code.extend(std::iter::repeat(0).take(width));
        self.note(|| format!("{} .L{}", mnemonic, label));
        PatchSite {
            position,
            width,
            label,
        }
    }

    fn next_label(&mut self) -> usize {
        self.labels += 1;
        self.labels
    }

    fn note(&mut self, text: impl FnOnce() -> String) {
        if self.keep_listing {
            self.listing.push(text());
        }
    }
}

/// Writes the resolved displacement of every relocation into `code`, which starts at
/// object offset `base`
pub fn apply_relocations(code: &mut [u8], base: usize, relocations: &[Relocation]) -> Result<()> {
    for relocation in relocations {
        let distance = relocation.target as i64 - (base + relocation.next_ip) as i64;
        let disp = i32::try_from(distance).map_err(|_| Error::Layout {
            message: format!("relocation distance {} out of range", distance),
        })?;
        code[relocation.position..relocation.position + 4].copy_from_slice(&disp.to_le_bytes());
    }
    Ok(())
}
