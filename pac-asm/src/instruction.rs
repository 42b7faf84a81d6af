//! Template-driven decoding of a single PAC instruction.
//!
//! An instruction is its 4-byte big-endian signature followed by a
//! variable-length argument payload. The template says how to walk the
//! payload; the payload itself can still override the template through
//! composite type bytes, and can end early when the bytes under a broken
//! composite turn out to be the next instruction (the cut-off fence).

use crate::bytes::{
    align_word, is_pac_instruction, read_cstr, read_f32_le, read_u32_le, read_u8, read_uint_le,
    WORD_SIZE,
};
use crate::catalog::{CountElem, CountKind, ParamKind, Template};
use crate::error::DecodeError;
use crate::value::{Arg, ArgSlot, SlotClass, TypeByte, Value, VarRef};

/// A fully decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Absolute file offset of the signature.
    pub offset: u32,
    /// Total byte length, signature included.
    pub size: u32,
    /// 4-byte big-endian signature.
    pub signature: u32,
    /// Name from the template.
    pub name: String,
    /// Overlay tag from the template.
    pub overlay: u32,
    /// Native handler address from the template.
    pub function_address: u32,
    /// Ordered decoded arguments (count arguments flattened).
    pub args: Vec<Arg>,
    /// The argument list ended early at a suspected next instruction.
    pub cut_off: bool,
    /// The template carried an unfinished `CONTINOUS_*` directive.
    pub continuous: bool,
}

enum Composite {
    Value(TypeByte, Value),
    CutOff,
}

fn decode_composite(
    data: &[u8],
    value_offset: u32,
    type_byte: u8,
    sizeof: u32,
) -> Result<Composite, DecodeError> {
    let class = TypeByte::classify(type_byte);
    let value = match class {
        TypeByte::FloatConst => {
            if sizeof == 2 {
                return Err(DecodeError::TwoByteFloat { offset: value_offset });
            }
            Value::Float(read_f32_le(data, value_offset)?)
        }
        TypeByte::OneByte | TypeByte::IntConst => {
            Value::Int(read_uint_le(data, value_offset, sizeof)?)
        }
        TypeByte::Unknown => {
            let fence = is_pac_instruction(data, value_offset.wrapping_sub(sizeof));
            if sizeof != 2 && fence {
                return Ok(Composite::CutOff);
            }
            if fence {
                // A 2-byte composite never admits the cut-off fence; decode
                // the slot as Unknown and leave a trace of the suspicion.
                tracing::warn!(
                    offset = value_offset,
                    "suspected instruction signature under a 2-byte composite"
                );
            }
            Value::Int(read_uint_le(data, value_offset, sizeof)?)
        }
        _ => Value::Var(VarRef { class, index: read_uint_le(data, value_offset, sizeof)? }),
    };
    Ok(Composite::Value(class, value))
}

struct Decoder<'a> {
    data: &'a [u8],
    cursor: u32,
    args: Vec<Arg>,
    cut_off: bool,
    continuous: bool,
}

impl<'a> Decoder<'a> {
    fn push(&mut self, class: SlotClass, name: &str, value: Value) {
        self.args.push(Arg { slot: ArgSlot { class, name: name.to_owned() }, value });
    }

    fn word(&mut self) -> Result<u32, DecodeError> {
        let value = read_u32_le(self.data, self.cursor)?;
        self.cursor += WORD_SIZE;
        Ok(value)
    }

    /// Word-aligned composite (`uintX_t_T` / `uint32_t_T`). Returns `false`
    /// when the cut-off fence fired and decoding must stop.
    fn composite(&mut self, kind: &ParamKind, name: &str) -> Result<bool, DecodeError> {
        if matches!(kind, ParamKind::UintXT) {
            self.cursor = align_word(self.cursor);
        }
        let type_byte = read_u8(self.data, self.cursor)?;
        self.cursor += WORD_SIZE;
        match decode_composite(self.data, self.cursor, type_byte, WORD_SIZE)? {
            Composite::Value(ty, value) => {
                self.push(SlotClass::Composite(ty), name, value);
                self.cursor += WORD_SIZE;
                Ok(true)
            }
            Composite::CutOff => {
                self.cursor -= WORD_SIZE;
                self.cut_off = true;
                Ok(false)
            }
        }
    }

    /// Compressed composite (`uintXC_t_T`): the type byte sits in the slack
    /// before the next word boundary. A cut-off here is not admitted.
    fn compressed_composite(&mut self, name: &str) -> Result<(), DecodeError> {
        let skip = WORD_SIZE - self.cursor % WORD_SIZE;
        let type_byte = read_u8(self.data, self.cursor)?;
        self.cursor += skip;
        match decode_composite(self.data, self.cursor, type_byte, WORD_SIZE)? {
            Composite::Value(ty, value) => {
                self.push(SlotClass::Composite(ty), name, value);
                self.cursor += WORD_SIZE;
                Ok(())
            }
            Composite::CutOff => Err(DecodeError::CutOffForbidden { offset: self.cursor }),
        }
    }

    /// 2-byte composite (`uint16_t_T`).
    fn small_composite(&mut self, name: &str) -> Result<(), DecodeError> {
        let type_byte = read_u8(self.data, self.cursor)?;
        self.cursor += 2;
        match decode_composite(self.data, self.cursor, type_byte, 2)? {
            Composite::Value(ty, value) => {
                self.push(SlotClass::Composite(ty), name, value);
                self.cursor += 2;
                Ok(())
            }
            // decode_composite never cuts off a 2-byte slot.
            Composite::CutOff => Err(DecodeError::CutOffForbidden { offset: self.cursor }),
        }
    }

    fn string(&mut self, name: &str) -> Result<(), DecodeError> {
        let offset = self.cursor;
        let raw = read_cstr(self.data, offset)?;
        let length = raw.len() as u32;
        let text = crate::bytes::decode_shift_jis(raw)
            .ok_or(DecodeError::BadString { offset })?
            .replace('\0', "");
        self.push(SlotClass::Param(ParamKind::String), name, Value::Str(text));
        self.cursor += length;
        Ok(())
    }

    fn count(
        &mut self,
        count: CountKind,
        elem: CountElem,
        name: &str,
    ) -> Result<(), DecodeError> {
        let n = match count {
            CountKind::Byte => {
                let n = read_u8(self.data, self.cursor)? as u32;
                // The interpreter aligns its program counter after the
                // header byte, so the header occupies a full word.
                self.cursor += WORD_SIZE;
                n
            }
            CountKind::Uint32 => {
                let type_byte = read_u8(self.data, self.cursor)?;
                if type_byte != 0x1 && type_byte != 0x2 {
                    return Err(DecodeError::BadCountHeader {
                        offset: self.cursor,
                        found: type_byte,
                    });
                }
                self.cursor += WORD_SIZE;
                self.word()?
            }
            CountKind::Uint32P => self.word()?,
        };

        for index in 0..n {
            match elem {
                CountElem::Composite => {
                    let type_byte = read_u8(self.data, self.cursor)?;
                    self.cursor += WORD_SIZE;
                    match decode_composite(self.data, self.cursor, type_byte, WORD_SIZE)? {
                        Composite::Value(ty, value) => {
                            self.push(
                                SlotClass::CountComposite { count, ty, index },
                                name,
                                value,
                            );
                            self.cursor += WORD_SIZE;
                        }
                        Composite::CutOff => {
                            self.cursor -= WORD_SIZE;
                            self.cut_off = true;
                            return Ok(());
                        }
                    }
                }
                CountElem::Plain => {
                    let value = self.word()?;
                    self.push(SlotClass::CountPlain { count, index }, "Unknown", Value::Int(value));
                }
            }
        }
        Ok(())
    }

    fn continuous(&mut self) -> Result<(), DecodeError> {
        let remains = (self.data.len() as u32).saturating_sub(self.cursor);
        for index in 0..remains / WORD_SIZE {
            let value = self.word()?;
            self.push(SlotClass::ContinuousElem(index), "Unknown", Value::Int(value));
        }
        self.continuous = true;
        Ok(())
    }
}

impl Instruction {
    /// Decode the instruction at `offset` according to `template`.
    ///
    /// `offset` must point at the signature; the signature itself is not
    /// re-validated here.
    pub fn decode(data: &[u8], offset: u32, template: &Template) -> Result<Instruction, DecodeError> {
        let mut dec = Decoder {
            data,
            cursor: offset + WORD_SIZE,
            args: Vec::with_capacity(template.params.len()),
            cut_off: false,
            continuous: false,
        };

        for param in &template.params {
            match &param.kind {
                ParamKind::UintX => {
                    dec.cursor = align_word(dec.cursor);
                    let value = dec.word()?;
                    dec.push(SlotClass::Param(ParamKind::UintX), &param.name, Value::Int(value));
                }
                kind @ (ParamKind::UintXT | ParamKind::Uint32T) => {
                    if !dec.composite(kind, &param.name)? {
                        break;
                    }
                }
                ParamKind::UintXCT => dec.compressed_composite(&param.name)?,
                ParamKind::Uint16T => dec.small_composite(&param.name)?,
                ParamKind::Float => {
                    let value = read_f32_le(data, dec.cursor)?;
                    dec.cursor += WORD_SIZE;
                    dec.push(SlotClass::Param(ParamKind::Float), &param.name, Value::Float(value));
                }
                ParamKind::String => dec.string(&param.name)?,
                ParamKind::Count { count, elem } => {
                    dec.count(*count, *elem, &param.name)?;
                    if dec.cut_off {
                        break;
                    }
                }
                kind @ (ParamKind::Uint32 | ParamKind::Uint32P | ParamKind::KeybindId) => {
                    let value = dec.word()?;
                    dec.push(SlotClass::Param(kind.clone()), &param.name, Value::Int(value));
                }
                kind @ (ParamKind::EntityId | ParamKind::EquipId) => {
                    dec.cursor += WORD_SIZE;
                    let value = dec.word()?;
                    dec.push(SlotClass::Param(kind.clone()), &param.name, Value::Int(value));
                }
                ParamKind::Continuous => dec.continuous()?,
                ParamKind::Other(tag) => {
                    tracing::trace!(
                        signature = template.signature,
                        tag = %tag,
                        "skipping opaque parameter"
                    );
                }
            }
        }

        Ok(Instruction {
            offset,
            size: dec.cursor - offset,
            signature: template.signature,
            name: template.name.clone(),
            overlay: template.overlay,
            function_address: template.function_address,
            args: dec.args,
            cut_off: dec.cut_off,
            continuous: dec.continuous,
        })
    }

    /// Offset one past the last byte of the instruction.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// The signature rendered back as its big-endian byte sequence.
    pub fn signature_bytes(&self) -> [u8; 4] {
        self.signature.to_be_bytes()
    }

    /// Variable references used by any argument.
    pub fn used_variables(&self) -> impl Iterator<Item = VarRef> + '_ {
        self.args.iter().filter_map(|arg| match (&arg.slot.class, &arg.value) {
            (SlotClass::Composite(ty), Value::Var(var)) if ty.is_variable() => Some(*var),
            _ => None,
        })
    }

    /// Values of `0x1` immediate arguments.
    pub fn one_byte_values(&self) -> impl Iterator<Item = u32> + '_ {
        self.args
            .iter()
            .filter(|arg| arg.slot.is_one_byte())
            .filter_map(|arg| arg.value.as_word())
    }

    /// Values of bare 4-byte word arguments (`uint32_t_P` / `uintX_t`).
    pub fn plain_word_values(&self) -> impl Iterator<Item = u32> + '_ {
        self.args
            .iter()
            .filter(|arg| arg.slot.is_plain_word())
            .filter_map(|arg| arg.value.as_word())
    }

    /// Integer constants used by any argument.
    pub fn int_constants(&self) -> impl Iterator<Item = u32> + '_ {
        self.args
            .iter()
            .filter(|arg| arg.slot.is_int_const())
            .filter_map(|arg| arg.value.as_word())
    }

    /// Float constants used by any argument.
    pub fn float_constants(&self) -> impl Iterator<Item = f32> + '_ {
        self.args.iter().filter_map(|arg| match (&arg.slot, &arg.value) {
            (slot, Value::Float(value)) if slot.is_float_const() => Some(*value),
            _ => None,
        })
    }
}
