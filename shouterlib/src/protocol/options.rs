//! The option model.
//!
//! One frame can carry any subset of three parallel option tables,
//! multiplexed by per-category bitmasks: unsigned 16-bit values, unsigned
//! 8-bit values, and variable-length values. Two of the 16-bit options and
//! one of the 8-bit options are themselves bitfields with named flags.
//!
//! [OptionTables] is the per-connection session state. Every decoded
//! response mutates it in place; it holds the last-known value of every
//! option ever fetched and is never invalidated automatically.

/// The three option categories. The discriminant is the category's slot
/// in the three header length bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    U16 = 0,
    U8 = 1,
    Var = 2,
}

/// Unsigned 16-bit options, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opt16 {
    Voltage = 0,
    VoltageMeasured = 1,
    PulseWidth = 2,
    PulseRepeat = 3,
    PulseDeadtime = 4,
    ArmTimeout = 5,
    FaultActive = 6,
    FaultLatched = 7,
    TemperatureMosfet = 8,
    TemperatureXformer = 9,
    TemperatureDiode = 10,
    MeasuredPulseWidth = 11,
}

impl Opt16 {
    pub const COUNT: usize = 12;

    pub const ALL: [Opt16; Self::COUNT] = [
        Opt16::Voltage,
        Opt16::VoltageMeasured,
        Opt16::PulseWidth,
        Opt16::PulseRepeat,
        Opt16::PulseDeadtime,
        Opt16::ArmTimeout,
        Opt16::FaultActive,
        Opt16::FaultLatched,
        Opt16::TemperatureMosfet,
        Opt16::TemperatureXformer,
        Opt16::TemperatureDiode,
        Opt16::MeasuredPulseWidth,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opt16::Voltage => "voltage",
            Opt16::VoltageMeasured => "voltage_measured",
            Opt16::PulseWidth => "pulse_width",
            Opt16::PulseRepeat => "pulse_repeat",
            Opt16::PulseDeadtime => "pulse_deadtime",
            Opt16::ArmTimeout => "arm_timeout",
            Opt16::FaultActive => "fault_active",
            Opt16::FaultLatched => "fault_latched",
            Opt16::TemperatureMosfet => "temperature_mosfet",
            Opt16::TemperatureXformer => "temperature_xformer",
            Opt16::TemperatureDiode => "temperature_diode",
            Opt16::MeasuredPulseWidth => "pulse_width_measured",
        }
    }
}

/// Unsigned 8-bit options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opt8 {
    BooleanConfig1 = 0,
    BootBits = 1,
    AbsentTemp = 2,
}

impl Opt8 {
    pub const COUNT: usize = 3;

    pub const ALL: [Opt8; Self::COUNT] = [Opt8::BooleanConfig1, Opt8::BootBits, Opt8::AbsentTemp];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opt8::BooleanConfig1 => "boolean_config_1",
            Opt8::BootBits => "bootbits",
            Opt8::AbsentTemp => "absenttemp",
        }
    }
}

/// Variable-length options. Each wire occurrence is self-describing as
/// (type byte, length byte, payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptVar {
    BoardId = 0,
    CurrentState = 1,
    PatternWave = 2,
    /// Write-only selector used to continue a [OptVar::PatternWave] upload.
    PatternWaveAppend = 3,
}

impl OptVar {
    pub const COUNT: usize = 4;

    pub const ALL: [OptVar; Self::COUNT] = [
        OptVar::BoardId,
        OptVar::CurrentState,
        OptVar::PatternWave,
        OptVar::PatternWaveAppend,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Type byte for a string-valued variable option.
pub const VAR_TYPE_STRING: u8 = 0x57;
/// Type byte for a hex-valued variable option.
pub const VAR_TYPE_HEX: u8 = 0x58;

/// Named fault flags decoded from [Opt16::FaultActive] and
/// [Opt16::FaultLatched].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fault {
    Probe = 0,
    Overtemp = 1,
    PanelOpen = 2,
    HighVoltage = 3,
    RamCrc = 4,
    EepromCrc = 5,
    GpioError = 6,
    LtfaultError = 7,
    TriggerError = 8,
    HardwareExc = 9,
    TriggerGlitch = 10,
    Overvoltage = 11,
    TempSensor = 12,
}

impl Fault {
    pub const COUNT: usize = 13;

    pub const ALL: [Fault; Self::COUNT] = [
        Fault::Probe,
        Fault::Overtemp,
        Fault::PanelOpen,
        Fault::HighVoltage,
        Fault::RamCrc,
        Fault::EepromCrc,
        Fault::GpioError,
        Fault::LtfaultError,
        Fault::TriggerError,
        Fault::HardwareExc,
        Fault::TriggerGlitch,
        Fault::Overvoltage,
        Fault::TempSensor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Fault::Probe => "probe",
            Fault::Overtemp => "overtemp",
            Fault::PanelOpen => "panel_open",
            Fault::HighVoltage => "high_voltage",
            Fault::RamCrc => "ram_crc",
            Fault::EepromCrc => "eeprom_crc",
            Fault::GpioError => "gpio_error",
            Fault::LtfaultError => "ltfault_error",
            Fault::TriggerError => "trigger_error",
            Fault::HardwareExc => "hardware_exc",
            Fault::TriggerGlitch => "trigger_glitch",
            Fault::Overvoltage => "overvoltage",
            Fault::TempSensor => "temp_sensor",
        }
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Named booleans packed into [Opt8::BooleanConfig1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigBit {
    ProbeTermination = 0,
    Tmode = 1,
    Emode = 2,
    Mute = 3,
    PatternTrigger = 4,
    DebugRealtime = 5,
    DebugPrint = 6,
    DebugHwOverride = 7,
}

impl ConfigBit {
    pub const COUNT: usize = 8;

    pub const ALL: [ConfigBit; Self::COUNT] = [
        ConfigBit::ProbeTermination,
        ConfigBit::Tmode,
        ConfigBit::Emode,
        ConfigBit::Mute,
        ConfigBit::PatternTrigger,
        ConfigBit::DebugRealtime,
        ConfigBit::DebugPrint,
        ConfigBit::DebugHwOverride,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigBit::ProbeTermination => "probe_termination",
            ConfigBit::Tmode => "tmode",
            ConfigBit::Emode => "emode",
            ConfigBit::Mute => "mute",
            ConfigBit::PatternTrigger => "pattern_trigger",
            ConfigBit::DebugRealtime => "debug_realtime",
            ConfigBit::DebugPrint => "debugprint",
            ConfigBit::DebugHwOverride => "debug_hw_override",
        }
    }
}

/// Pack flags into an integer, bit *i* ⇔ flag *i*.
pub fn pack_bools(flags: &[bool]) -> u32 {
    flags
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &f)| if f { acc | 1 << i } else { acc })
}

/// Unpack the low `count` bits of an integer into flags, bit *i* ⇔ flag *i*.
pub fn unpack_bools(value: u32, count: usize) -> Vec<bool> {
    (0..count).map(|i| value & 1 << i != 0).collect()
}

/// Last-known values of every option, per connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionTables {
    u16s: [u16; Opt16::COUNT],
    u8s: [u8; Opt8::COUNT],
    board_id: String,
    current_state: String,
    pattern_wave: String,
    faults_active: [bool; Fault::COUNT],
    faults_latched: [bool; Fault::COUNT],
    config_bits: [bool; ConfigBit::COUNT],
}

impl OptionTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_u16(&self, opt: Opt16) -> u16 {
        self.u16s[opt as usize]
    }

    /// Store a 16-bit option. Writes to the fault registers also fan out
    /// into the corresponding named-fault map.
    pub fn set_u16(&mut self, opt: Opt16, value: u16) {
        self.u16s[opt as usize] = value;
        match opt {
            Opt16::FaultActive => fan_out(value as u32, &mut self.faults_active),
            Opt16::FaultLatched => fan_out(value as u32, &mut self.faults_latched),
            _ => {}
        }
    }

    pub fn get_u8(&self, opt: Opt8) -> u8 {
        self.u8s[opt as usize]
    }

    /// Store an 8-bit option. Writes to [Opt8::BooleanConfig1] also fan
    /// out into the named config booleans.
    pub fn set_u8(&mut self, opt: Opt8, value: u8) {
        self.u8s[opt as usize] = value;
        if opt == Opt8::BooleanConfig1 {
            fan_out(value as u32, &mut self.config_bits);
        }
    }

    /// Store a variable-length option payload.
    ///
    /// Empty payloads are ignored. [OptVar::PatternWave] payloads are
    /// continuation fragments and append to the accumulated bit string;
    /// the append selector is write-only and never comes back from the
    /// device.
    pub fn set_var(&mut self, opt: OptVar, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        match opt {
            OptVar::BoardId => self.board_id = String::from_utf8_lossy(payload).into_owned(),
            OptVar::CurrentState => {
                self.current_state = String::from_utf8_lossy(payload).into_owned()
            }
            OptVar::PatternWave => self.append_wave_fragment(payload),
            OptVar::PatternWaveAppend => {}
        }
    }

    /// Decode one pattern-wave fragment: a bit-count byte followed by
    /// MSB-first packed bits, at most `bit count` of which are live.
    fn append_wave_fragment(&mut self, payload: &[u8]) {
        let bits = payload[0] as usize;
        let mut count = 0;
        for &byte in &payload[1..] {
            for shift in 0..8 {
                if count >= bits {
                    return;
                }
                self.pattern_wave
                    .push(if byte & (0x80 >> shift) != 0 { '1' } else { '0' });
                count += 1;
            }
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn pattern_wave(&self) -> &str {
        &self.pattern_wave
    }

    /// Forget the accumulated pattern wave before a fresh fetch.
    pub fn reset_pattern_wave(&mut self) {
        self.pattern_wave.clear();
    }

    /// Names of the faults whose decoded bit is set.
    pub fn faults(&self, latched: bool) -> Vec<Fault> {
        let map = if latched {
            &self.faults_latched
        } else {
            &self.faults_active
        };
        Fault::ALL
            .iter()
            .copied()
            .filter(|&f| map[f as usize])
            .collect()
    }

    pub fn config_bit(&self, bit: ConfigBit) -> bool {
        self.config_bits[bit as usize]
    }

    /// The current config booleans re-packed with one bit replaced, ready
    /// to send back as a [Opt8::BooleanConfig1] write.
    pub fn packed_config_with(&self, bit: ConfigBit, value: bool) -> u8 {
        let mut bits = self.config_bits;
        bits[bit as usize] = value;
        pack_bools(&bits) as u8
    }
}

fn fan_out<const N: usize>(value: u32, flags: &mut [bool; N]) {
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = value & 1 << i != 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn roundtrip_bools(value: u16) -> bool {
        pack_bools(&unpack_bools(value as u32, 16)) == value as u32
    }

    #[test]
    fn fault_decode_probe() {
        let mut tables = OptionTables::new();
        tables.set_u16(Opt16::FaultActive, 0x0001);
        assert_eq!(tables.faults(false), vec![Fault::Probe]);
    }

    #[test]
    fn fault_decode_probe_and_panel() {
        let mut tables = OptionTables::new();
        tables.set_u16(Opt16::FaultActive, 0x0005);
        assert_eq!(tables.faults(false), vec![Fault::Probe, Fault::PanelOpen]);
    }

    #[test]
    fn latched_faults_are_separate() {
        let mut tables = OptionTables::new();
        tables.set_u16(Opt16::FaultLatched, 1 << Fault::TriggerGlitch as u16);
        assert_eq!(tables.faults(false), vec![]);
        assert_eq!(tables.faults(true), vec![Fault::TriggerGlitch]);
    }

    #[test]
    fn config_fan_out() {
        let mut tables = OptionTables::new();
        tables.set_u8(Opt8::BooleanConfig1, 0b0001_1001);
        assert!(tables.config_bit(ConfigBit::ProbeTermination));
        assert!(!tables.config_bit(ConfigBit::Tmode));
        assert!(tables.config_bit(ConfigBit::Mute));
        assert!(tables.config_bit(ConfigBit::PatternTrigger));
    }

    #[test]
    fn packed_config_replaces_one_bit() {
        let mut tables = OptionTables::new();
        tables.set_u8(Opt8::BooleanConfig1, 0b0000_0001);
        assert_eq!(tables.packed_config_with(ConfigBit::Mute, true), 0b0000_1001);
        assert_eq!(
            tables.packed_config_with(ConfigBit::ProbeTermination, false),
            0
        );
    }

    #[test]
    fn wave_fragment_respects_bit_count() {
        let mut tables = OptionTables::new();
        // 9 live bits: 1011_0010 1... = "101100101"
        tables.set_var(OptVar::PatternWave, &[9, 0b1011_0010, 0b1000_0000]);
        assert_eq!(tables.pattern_wave(), "101100101");
    }

    #[test]
    fn wave_fragments_accumulate() {
        let mut tables = OptionTables::new();
        tables.set_var(OptVar::PatternWave, &[4, 0b1010_0000]);
        tables.set_var(OptVar::PatternWave, &[2, 0b1100_0000]);
        assert_eq!(tables.pattern_wave(), "101011");
        tables.reset_pattern_wave();
        assert_eq!(tables.pattern_wave(), "");
    }

    #[test]
    fn empty_var_payload_ignored() {
        let mut tables = OptionTables::new();
        tables.set_var(OptVar::BoardId, b"NAE0042");
        tables.set_var(OptVar::BoardId, b"");
        assert_eq!(tables.board_id(), "NAE0042");
    }
}
