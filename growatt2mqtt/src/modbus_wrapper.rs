use crate::telemetry::AddressSpace;

pub trait ModbusWrapper {
    // Narrow view of a Modbus client as used by a polling session. Binaries
    // wrap their protocol implementation in a new type implementing this
    // trait, which keeps the library free of any particular client crate.
    // Implementations are expected to bound every call with a timeout and
    // report an expired timeout as an error.

    fn connect(&mut self) -> anyhow::Result<()>;

    fn read_holding_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>>;

    fn read_input_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>>;

    fn write_registers(&mut self, address: u16, values: &[u16]) -> anyhow::Result<()>;

    fn close(&mut self);

    fn read_registers(
        &mut self,
        space: AddressSpace,
        address: u16,
        count: u16,
    ) -> anyhow::Result<Vec<u16>> {
        match space {
            AddressSpace::Holding => self.read_holding_registers(address, count),
            AddressSpace::Input => self.read_input_registers(address, count),
        }
    }
}
