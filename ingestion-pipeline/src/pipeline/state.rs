use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Fetched, Extracted, Deduplicated, Persisted, Failed],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        extract { transition: { from: Fetched, to: Extracted } }
        deduplicate { transition: { from: Extracted, to: Deduplicated } }
        persist { transition: { from: Deduplicated, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Fetched, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Deduplicated, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
