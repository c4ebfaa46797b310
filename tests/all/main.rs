mod consumers;
mod helpers;
mod rpc;
mod test_broker;
