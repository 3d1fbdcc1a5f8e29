use crate::domain::entity::EntityState;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct StateRow<'a> {
    entity: &'a str,
    machine: &'a str,
    state: &'a str,
    level: Decimal,
    coherence: Decimal,
    evolutions: u64,
    active: bool,
}

/// Writes one CSV row per entity:
/// `entity,machine,state,level,coherence,evolutions,active`.
pub struct EntityStateWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EntityStateWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// `label` is printed in the `entity` column, typically the manifest alias
    /// or the entity id.
    pub fn write_states<'a, I>(&mut self, states: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a EntityState)>,
    {
        for (label, state) in states {
            self.writer.serialize(StateRow {
                entity: label,
                machine: &state.machine_id,
                state: &state.current_state,
                level: state.metrics.level.normalize(),
                coherence: state.metrics.coherence.normalize(),
                evolutions: state.evolution_count,
                active: state.active,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
